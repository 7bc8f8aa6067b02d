use crate::config::{OutputDomain, Range};

/// Map a governed position onto the drive-signal domain.
///
/// Positive positions scale over `center..=max` against `range.max`, negative
/// ones over `min..=center` against `|range.min|`. The result is clamped to
/// `[min, max]`.
pub fn map_to_drive(position: i32, range: &Range, domain: &OutputDomain) -> u16 {
    let center = i64::from(domain.center);
    let position = i64::from(position);

    let duty = if position > 0 && range.max > 0 {
        center + position * (i64::from(domain.max) - center) / i64::from(range.max)
    } else if position < 0 && range.min < 0 {
        center + position * (center - i64::from(domain.min)) / -i64::from(range.min)
    } else {
        center
    };

    duty.clamp(i64::from(domain.min), i64::from(domain.max)) as u16
}

/// Disable-line pattern `[primary, secondary]` for an escalation level.
pub fn disable_lines_for_level(level: u8) -> [bool; 2] {
    match level {
        0 | 1 => [false, false],
        2 => [true, false],
        _ => [true, true],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEER_RANGE: Range = Range { min: -450, max: 450 };
    const STEER_PWM: OutputDomain = OutputDomain {
        min: 1000,
        center: 1500,
        max: 2000,
    };
    const BRAKE_RANGE: Range = Range { min: 0, max: 100 };
    const BRAKE_DUTY: OutputDomain = OutputDomain {
        min: 0,
        center: 0,
        max: 100,
    };

    #[test]
    fn test_steering_center_and_extremes() {
        assert_eq!(map_to_drive(0, &STEER_RANGE, &STEER_PWM), 1500);
        assert_eq!(map_to_drive(450, &STEER_RANGE, &STEER_PWM), 2000);
        assert_eq!(map_to_drive(-450, &STEER_RANGE, &STEER_PWM), 1000);
    }

    #[test]
    fn test_steering_is_mirrored() {
        assert_eq!(map_to_drive(200, &STEER_RANGE, &STEER_PWM), 1722);
        assert_eq!(map_to_drive(-200, &STEER_RANGE, &STEER_PWM), 1278);
    }

    #[test]
    fn test_out_of_domain_is_clamped() {
        assert_eq!(map_to_drive(900, &STEER_RANGE, &STEER_PWM), 2000);
        assert_eq!(map_to_drive(-900, &STEER_RANGE, &STEER_PWM), 1000);
        assert_eq!(map_to_drive(150, &BRAKE_RANGE, &BRAKE_DUTY), 100);
    }

    #[test]
    fn test_brake_duty_is_position() {
        for position in [0, 1, 37, 99, 100] {
            assert_eq!(map_to_drive(position, &BRAKE_RANGE, &BRAKE_DUTY), position as u16);
        }
    }

    #[test]
    fn test_disable_line_levels() {
        assert_eq!(disable_lines_for_level(1), [false, false]);
        assert_eq!(disable_lines_for_level(2), [true, false]);
        assert_eq!(disable_lines_for_level(3), [true, true]);
    }
}
