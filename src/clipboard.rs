use std::io::{self, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

// Terminals and tmux cap OSC52 payloads.
const MAX_BYTES: usize = 100_000;

fn osc52_sequence(text: &str) -> String {
    let bytes = text.as_bytes();
    let slice = &bytes[..bytes.len().min(MAX_BYTES)];
    format!("\x1b]52;c;{}\x07", STANDARD.encode(slice))
}

// Copies text through OSC52 so it works over ssh.
pub fn copy_text_via_osc52(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(osc52_sequence(text).as_bytes())?;
    stdout.flush()
}
