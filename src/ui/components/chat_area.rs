use eframe::egui;

use crate::common::Direction;
use crate::render::{DeliveryStatus, Fragment};

/// Draw the message list. `scroll_to` forces the given row into view even
/// when the user has scrolled away from the bottom.
pub fn render(
    ui: &mut egui::Ui,
    messages: &[Fragment],
    error: Option<&str>,
    scroll_to: Option<usize>,
) {
    if let Some(error) = error {
        ui.colored_label(egui::Color32::LIGHT_RED, error);
    }

    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .show(ui, |ui| {
            if messages.is_empty() {
                ui.label(egui::RichText::new("No messages yet").weak());
            }
            for (index, fragment) in messages.iter().enumerate() {
                let row = bubble(ui, fragment);
                if scroll_to == Some(index) {
                    row.scroll_to_me(Some(egui::Align::BOTTOM));
                }
            }
        });
}

fn bubble(ui: &mut egui::Ui, fragment: &Fragment) -> egui::Response {
    let layout = match fragment.direction {
        Direction::Mine => egui::Layout::right_to_left(egui::Align::TOP),
        Direction::Theirs => egui::Layout::left_to_right(egui::Align::TOP),
    };
    ui.with_layout(layout, |ui| {
        let text = egui::RichText::new(&fragment.content);
        match fragment.status {
            DeliveryStatus::Delivered => {
                ui.label(text);
            }
            DeliveryStatus::Pending => {
                ui.label(egui::RichText::new("…").weak());
                ui.label(text.weak());
            }
            DeliveryStatus::Failed => {
                ui.colored_label(egui::Color32::LIGHT_RED, "not sent");
                ui.label(text.strikethrough());
            }
        }
    })
    .response
}
