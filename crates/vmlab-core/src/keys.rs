use crate::CoreError;
use std::time::Duration;
use tracing::debug;
use vmlab_runtime::ControlPlane;
use vmlab_schema::keycode_for;

/// Keycodes for `text`; fails on the first character without one.
pub fn encode_text(text: &str) -> Result<Vec<u16>, CoreError> {
    text.chars()
        .map(|c| keycode_for(c).ok_or(CoreError::UnmappedKey(c)))
        .collect()
}

/// Type `text` into a live domain, one key every `delay`.
///
/// Nothing is sent unless every character can be typed.
pub fn send_text(
    control_plane: &dyn ControlPlane,
    domain: &str,
    text: &str,
    delay: Duration,
) -> Result<(), CoreError> {
    let codes = encode_text(text)?;
    debug!("typing {} keys into {domain}", codes.len());
    for code in codes {
        control_plane.send_key(domain, code)?;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
    Ok(())
}
