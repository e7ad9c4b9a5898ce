//! Request-boundary validation. §4.L.
//!
//! Pure functions the handlers call before touching any component: opaque
//! ids must be non-empty, coordinates must be in range, the notification
//! window must be one of the four allowed values, and free-text fields get
//! their HTML tags stripped before they reach storage or a rendered
//! notification.

use crate::errors::{QueueError, QueueResult};

const VALID_WINDOW_MINUTES: [u32; 4] = [5, 10, 15, 20];

pub fn require_non_empty_id(field: &str, value: &str) -> QueueResult<()> {
    if value.trim().is_empty() {
        Err(QueueError::MissingRequiredField(field.to_string()))
    } else {
        Ok(())
    }
}

pub fn validate_latitude(value: f64) -> QueueResult<()> {
    if (-90.0..=90.0).contains(&value) {
        Ok(())
    } else {
        Err(QueueError::InvalidCoordinates)
    }
}

pub fn validate_longitude(value: f64) -> QueueResult<()> {
    if (-180.0..=180.0).contains(&value) {
        Ok(())
    } else {
        Err(QueueError::InvalidCoordinates)
    }
}

pub fn validate_window_minutes(value: u32) -> QueueResult<()> {
    if VALID_WINDOW_MINUTES.contains(&value) {
        Ok(())
    } else {
        Err(QueueError::InvalidInput("windowMinutes must be one of 5, 10, 15, 20".to_string()))
    }
}

/// Strips `<...>` tag markup from free-text input (service names, cancel
/// reasons) before it's persisted or echoed back in a notification body.
pub fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_id_is_rejected() {
        assert!(matches!(
            require_non_empty_id("queueId", "   "),
            Err(QueueError::MissingRequiredField(_))
        ));
    }

    #[test]
    fn latitude_bounds() {
        assert!(validate_latitude(90.0).is_ok());
        assert!(validate_latitude(90.1).is_err());
        assert!(validate_latitude(-90.1).is_err());
    }

    #[test]
    fn window_minutes_enum() {
        assert!(validate_window_minutes(15).is_ok());
        assert!(validate_window_minutes(12).is_err());
    }

    #[test]
    fn strips_script_tags() {
        assert_eq!(strip_html_tags("hello <script>alert(1)</script> world"), "hello alert(1) world");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(strip_html_tags("Haircut + Shave"), "Haircut + Shave");
    }
}
