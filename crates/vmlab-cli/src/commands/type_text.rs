use super::{open_session, settings_for, EXIT_SUCCESS};
use std::time::Duration;
use vmlab_core::send_text;

pub fn run(
    backend: &str,
    uri: Option<&str>,
    domain: &str,
    text: &str,
    enter: bool,
    delay_ms: u64,
) -> Result<u8, String> {
    let session = open_session(backend, &settings_for(uri, None))?;
    let control_plane = session.connect(None).map_err(|e| e.to_string())?;
    let mut text = text.to_owned();
    if enter {
        text.push('\n');
    }
    send_text(
        control_plane.as_ref(),
        domain,
        &text,
        Duration::from_millis(delay_ms),
    )
    .map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}
