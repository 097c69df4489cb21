//! Text read-out for note changes.

/// Deviation covered by the gauge on each side of center.
const METER_RANGE: i32 = 50;

/// Half-width of the gauge in characters.
const METER_HALF_WIDTH: i32 = 10;

/// Deviation considered in tune.
const IN_TUNE_CENTS: i32 = 5;

/// Renders a one-line gauge such as `[---------|--*------]`.
///
/// Values beyond the range pin to the edge and show an arrow instead.
pub fn gauge(cents: i32) -> String {
    let clamped = cents.clamp(-METER_RANGE, METER_RANGE);
    let position = METER_HALF_WIDTH + clamped * METER_HALF_WIDTH / METER_RANGE;

    let mut line = String::with_capacity((METER_HALF_WIDTH * 2 + 3) as usize);
    line.push('[');
    for i in 0..=METER_HALF_WIDTH * 2 {
        let c = if i == position {
            match cents {
                c if c < -METER_RANGE => '<',
                c if c > METER_RANGE => '>',
                _ => '*',
            }
        } else if i == METER_HALF_WIDTH {
            '|'
        } else {
            '-'
        };
        line.push(c);
    }
    line.push(']');
    line
}

/// Formats a note change for the terminal.
pub fn format_change(note: &str, cents: i32) -> String {
    let verdict = match cents {
        c if c.abs() <= IN_TUNE_CENTS => "in tune",
        c if c < 0 => "flat",
        _ => "sharp",
    };
    format!("{note:<4} {cents:+4} cents {} {verdict}", gauge(cents))
}
