//! HUD text.
//!
//! Presentation is left to whoever draws the overlay; this only produces the
//! strings.

use reckon_shared::config::{MotionShape, WorldSettings};

pub fn average_update_time_text(average_update_interval: f32) -> String {
    format!("Average Server Update Time: {:.6}", average_update_interval)
}

pub fn motion_info_text(settings: &WorldSettings) -> String {
    match settings.shape {
        MotionShape::Circle => format!(
            "Circle Motion\nRadius = {:.1}, Speed {:.1} degrees per second",
            settings.radius, settings.angular_speed_deg
        ),
        MotionShape::Square => format!(
            "Square Motion\nSide Length = {:.1}, Speed {:.1}",
            settings.side_length, settings.speed
        ),
    }
}

pub fn rendered_speed_text(speed: f64) -> String {
    format!("Rendered Speed: {:.1}", speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_update_time_has_six_decimals() {
        assert_eq!(average_update_time_text(0.25), "Average Server Update Time: 0.250000");
    }

    #[test]
    fn motion_info_per_shape() {
        let circle = WorldSettings::default();
        assert_eq!(
            motion_info_text(&circle),
            "Circle Motion\nRadius = 300.0, Speed 90.0 degrees per second"
        );
        let square = WorldSettings {
            shape: MotionShape::Square,
            ..WorldSettings::default()
        };
        assert_eq!(motion_info_text(&square), "Square Motion\nSide Length = 300.0, Speed 200.0");
    }
}
