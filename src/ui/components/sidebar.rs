use eframe::egui;

use crate::common::ClientCommand;
use crate::render::RosterEntry;

/// Draw the roster. Returns the command of the entry that was clicked.
pub fn render(ui: &mut egui::Ui, roster: &[RosterEntry]) -> Option<ClientCommand> {
    ui.heading("Conversations");
    ui.separator();

    if roster.is_empty() {
        ui.label("No contacts yet");
        return None;
    }

    let mut clicked = None;
    egui::ScrollArea::vertical().show(ui, |ui| {
        for entry in roster {
            ui.horizontal(|ui| {
                let (color, dot) = if entry.peer.online {
                    (egui::Color32::GREEN, "●")
                } else {
                    (egui::Color32::GRAY, "○")
                };
                ui.colored_label(color, dot);

                if ui.selectable_label(entry.selected, entry.peer.name.as_str()).clicked() {
                    clicked = Some(entry.select_command());
                }
            });
        }
    });
    clicked
}
