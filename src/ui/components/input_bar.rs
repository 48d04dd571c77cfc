use eframe::egui;

/// Returns the trimmed draft when the user submits a non-blank message.
pub fn render(ui: &mut egui::Ui, input_text: &mut String, enabled: bool) -> Option<String> {
    let mut send = false;
    ui.add_enabled_ui(enabled, |ui| {
        ui.horizontal(|ui| {
            let response = ui.add(
                egui::TextEdit::singleline(input_text)
                    .hint_text("Write a message")
                    .desired_width(ui.available_width() - 60.0),
            );
            if ui.button("Send").clicked() {
                send = true;
            }

            if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                send = true;
                response.request_focus();
            }
        });
    });

    if !enabled || !send || input_text.trim().is_empty() {
        return None;
    }
    let message = input_text.trim().to_string();
    input_text.clear();
    Some(message)
}
