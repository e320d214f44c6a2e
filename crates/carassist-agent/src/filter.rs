/// Suppresses generated text up to and including a marker (the model's
/// visible reasoning) and passes everything after it through unchanged.
#[derive(Debug, Clone)]
pub struct MarkerFilter {
    marker: Option<String>,
    buffer: String,
    emitting: bool,
}

impl MarkerFilter {
    /// `None` or an empty marker relays every token.
    pub fn new(marker: Option<&str>) -> Self {
        let marker = marker.filter(|m| !m.is_empty()).map(str::to_string);
        let emitting = marker.is_none();
        Self { marker, buffer: String::new(), emitting }
    }

    pub fn is_emitting(&self) -> bool { self.emitting }

    /// Feed one token; returns the text to relay, if any. Empty fragments
    /// are never returned.
    pub fn push(&mut self, token: &str) -> Option<String> {
        if self.emitting {
            return (!token.is_empty()).then(|| token.to_string());
        }
        self.buffer.push_str(token);
        let marker = self.marker.as_deref()?;
        let pos = self.buffer.find(marker)?;
        self.emitting = true;
        let rest = self.buffer[pos + marker.len()..].to_string();
        self.buffer.clear();
        (!rest.is_empty()).then_some(rest)
    }
}
