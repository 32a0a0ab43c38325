/// Running transcripts of the current session, one per direction.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Transcripts {
    pub input: String,
    pub output: String,
}

impl Transcripts {
    pub fn push_input(&mut self, delta: &str) {
        self.input.push_str(delta);
    }

    pub fn push_output(&mut self, delta: &str) {
        self.output.push_str(delta);
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}
