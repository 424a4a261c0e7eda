//! SMPTE timecode in packed BCD, converted to and from flicks.
//!
//! Layout of the 32-bit value, most significant first: hours (6 bits),
//! minutes (7), seconds (7), field flag, drop-frame flag, frames (6). Rates
//! above 50 Hz count frame pairs and use the field flag for the odd frame.
//! Non-integer rates (29.97, 59.94) use drop-frame numbering.

/// Flicks per second: divisible by every common frame and sample rate
pub const FLICKS_PER_SECOND: i64 = 705_600_000;

/// Marker for "no timecode available"
pub const NO_TIMECODE: u32 = 0xffff_ffff;

fn bcd_to_int(value: u32) -> u32 {
    (value >> 4) * 10 + (value & 0xf)
}

fn fielded(frame_duration: i64) -> bool {
    frame_duration <= FLICKS_PER_SECOND / 50
}

/// Nominal (rounded up) frames per second
fn nominal_fps(frame_duration: i64) -> i64 {
    (FLICKS_PER_SECOND + frame_duration - 1) / frame_duration
}

/// Decode a BCD timecode into a timeline position in flicks
pub fn bcd_to_flicks(timecode: u32, frame_duration: i64) -> i64 {
    if timecode == NO_TIMECODE || frame_duration <= 0 {
        return 0;
    }

    let hour = bcd_to_int((timecode >> 24) & 0x3f) as i64;
    let minute = bcd_to_int((timecode >> 16) & 0x7f) as i64;
    let second = bcd_to_int((timecode >> 8) & 0x7f) as i64;
    let field = ((timecode >> 7) & 1) as i64;
    let drop = (timecode >> 6) & 1 != 0;
    let frame = bcd_to_int(timecode & 0x3f) as i64;

    let fps = nominal_fps(frame_duration);
    let mut total = ((hour * 60 + minute) * 60 + second) * fps * frame_duration;

    // Two frame numbers are skipped every minute except each tenth one
    if drop {
        total -= (hour * 54 + minute - minute / 10) * 4 * frame_duration;
    }

    let multiplier = if fielded(frame_duration) { 2 } else { 1 };
    total + (frame * multiplier + field) * frame_duration
}

/// Encode a timeline position in flicks as a BCD timecode.
/// Wraps around every 24 hours.
pub fn flicks_to_bcd(flicks: i64, frame_duration: i64) -> u32 {
    if flicks <= 0 || frame_duration <= 0 {
        return 0;
    }

    let drop = if FLICKS_PER_SECOND % frame_duration != 0 { 4 } else { 0 };
    let fps = nominal_fps(frame_duration);

    // Frames per ten minutes
    let fpm10 = fps * 60 * 10 - drop * 9;

    let mut frames = flicks / frame_duration;

    let mut hours = frames / (fpm10 * 6);
    frames -= hours * fpm10 * 6;

    let min10s = frames / fpm10;
    frames -= min10s * fpm10;

    let min01s = (frames - drop) / (fps * 60 - drop);
    frames -= min01s * (fps * 60 - drop) + if min01s > 0 { drop } else { 0 };

    let seconds = frames / fps;
    frames -= seconds * fps;

    hours %= 24;

    if min01s > 0 {
        frames += drop;
    }

    let mut field = 0;
    if fielded(frame_duration) {
        field = frames & 1;
        frames /= 2;
    }

    let mut bcd = 0i64;
    bcd += (hours / 10) * 0x1000_0000 + (hours % 10) * 0x0100_0000;
    bcd += min10s * 0x0010_0000 + min01s * 0x0001_0000;
    bcd += (seconds / 10) * 0x0000_1000 + (seconds % 10) * 0x0000_0100;
    bcd += field * 0x0000_0080;
    if drop > 0 {
        bcd += 0x0000_0040;
    }
    bcd += (frames / 10) * 0x0000_0010 + (frames % 10);

    bcd as u32
}
