use serde::{Deserialize, Serialize};

/// Side toward which an outpaint extends the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
    Around,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" | "west" => Some(Direction::Left),
            "right" | "east" => Some(Direction::Right),
            "up" | "top" | "north" => Some(Direction::Up),
            "down" | "bottom" | "south" => Some(Direction::Down),
            "around" | "all" | "all-sides" | "all_sides" | "both" => Some(Direction::Around),
            _ => None,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "top",
            Direction::Down => "bottom",
            Direction::Around => "all sides",
        }
    }
}

/// Camera-motion vocabulary for video kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMotion {
    Static,
    PanLeft,
    PanRight,
    TiltUp,
    TiltDown,
    ZoomIn,
    ZoomOut,
    DollyIn,
    DollyOut,
    Orbit,
    Crane,
    Handheld,
}

impl CameraMotion {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let motion = match normalized.as_str() {
            "static" | "still" | "locked" | "none" => CameraMotion::Static,
            "pan_left" => CameraMotion::PanLeft,
            "pan_right" => CameraMotion::PanRight,
            "tilt_up" => CameraMotion::TiltUp,
            "tilt_down" => CameraMotion::TiltDown,
            "zoom_in" => CameraMotion::ZoomIn,
            "zoom_out" => CameraMotion::ZoomOut,
            "dolly_in" | "push_in" => CameraMotion::DollyIn,
            "dolly_out" | "pull_out" => CameraMotion::DollyOut,
            "orbit" | "arc" => CameraMotion::Orbit,
            "crane" | "crane_up" => CameraMotion::Crane,
            "handheld" => CameraMotion::Handheld,
            _ => return None,
        };
        Some(motion)
    }

    pub fn describe(self) -> &'static str {
        match self {
            CameraMotion::Static => "locked-off static camera, no camera movement",
            CameraMotion::PanLeft => "slow smooth pan to the left",
            CameraMotion::PanRight => "slow smooth pan to the right",
            CameraMotion::TiltUp => "gentle upward tilt",
            CameraMotion::TiltDown => "gentle downward tilt",
            CameraMotion::ZoomIn => "gradual zoom in toward the subject",
            CameraMotion::ZoomOut => "gradual zoom out revealing the scene",
            CameraMotion::DollyIn => "dolly push in toward the subject",
            CameraMotion::DollyOut => "dolly pull back away from the subject",
            CameraMotion::Orbit => "slow orbit around the subject",
            CameraMotion::Crane => "rising crane shot",
            CameraMotion::Handheld => "subtle handheld camera sway",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CameraMotion, Direction};

    #[test]
    fn direction_parse_is_case_insensitive() {
        assert_eq!(Direction::parse("RIGHT"), Some(Direction::Right));
        assert_eq!(Direction::parse("all sides"), None);
        assert_eq!(Direction::parse("all-sides"), Some(Direction::Around));
        assert_eq!(Direction::parse("diagonal"), None);
    }

    #[test]
    fn camera_motion_accepts_spaced_and_dashed_forms() {
        assert_eq!(CameraMotion::parse("zoom in"), Some(CameraMotion::ZoomIn));
        assert_eq!(CameraMotion::parse("pan-left"), Some(CameraMotion::PanLeft));
        assert_eq!(CameraMotion::parse("spin"), None);
        assert!(CameraMotion::Orbit.describe().contains("orbit"));
    }
}
