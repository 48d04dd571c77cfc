use eframe::egui;
use tokio::sync::mpsc;

use crate::common::{ClientCommand, ClientEvent};

use super::components::{chat_area, input_bar, sidebar};
use super::state::AppState;

pub struct ChatApp {
    state: AppState,
    command_sender: mpsc::Sender<ClientCommand>,
    event_receiver: mpsc::Receiver<ClientEvent>,
}

impl ChatApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        command_sender: mpsc::Sender<ClientCommand>,
        event_receiver: mpsc::Receiver<ClientEvent>,
    ) -> Self {
        Self {
            state: AppState::new(),
            command_sender,
            event_receiver,
        }
    }

    fn handle_client_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            match event {
                ClientEvent::ConversationUpdated(snapshot) => self.state.apply_conversation(snapshot),
                ClientEvent::RosterUpdated(roster) => self.state.apply_roster(roster),
                ClientEvent::Notice(notice) => self.state.push_notice(notice),
                ClientEvent::LoggedOut => self.state.mark_logged_out(),
            }
        }
    }

    fn send_command(&self, command: ClientCommand) {
        if let Err(err) = self.command_sender.try_send(command) {
            log::warn!("Failed to send command to client loop: {err}");
        }
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_client_events();

        if self.state.logged_out {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| ui.heading("Signed out"));
            });
            return;
        }

        egui::SidePanel::left("roster_sidebar")
            .resizable(true)
            .default_width(200.0)
            .show(ctx, |ui| {
                if let Some(command) = sidebar::render(ui, &self.state.roster) {
                    self.send_command(command);
                }
            });

        egui::TopBottomPanel::bottom("notice_bar").show(ctx, |ui| {
            match self.state.latest_notice() {
                Some(notice) => {
                    ui.colored_label(
                        egui::Color32::LIGHT_RED,
                        format!("[{}] {}", notice.at.format("%H:%M:%S"), notice.message),
                    );
                }
                None => {
                    ui.label(egui::RichText::new("Ready").weak());
                }
            }
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading(self.state.title());
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Log out").clicked() {
                        self.send_command(ClientCommand::Logout);
                    }
                });
            });
            ui.separator();

            let enabled = self.state.can_compose();
            let submitted = egui::TopBottomPanel::bottom("input_bar")
                .show_inside(ui, |ui| input_bar::render(ui, &mut self.state.input_text, enabled))
                .inner;
            if let Some(content) = submitted {
                self.send_command(ClientCommand::SendMessage(content));
            }

            let scroll_to = self.state.take_scroll_target();
            chat_area::render(
                ui,
                &self.state.messages,
                self.state.error.as_deref(),
                scroll_to,
            );
        });

        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}
