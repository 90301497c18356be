use std::time::{SystemTime, UNIX_EPOCH};

/// RFC 1123 date for the current wall clock, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`.
#[inline]
pub(crate) fn httpdate_now() -> [u8; 29] {
    httpdate(SystemTime::now())
}

/// Render `at` as an RFC 1123 date.
pub(crate) fn httpdate(at: SystemTime) -> [u8; 29] {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let (year, month, day, weekday) = civil_date(secs / 86_400);
    let secs_of_day = secs % 86_400;

    const DAY_NAMES: [&[u8; 3]; 7] = [b"Mon", b"Tue", b"Wed", b"Thu", b"Fri", b"Sat", b"Sun"];
    const MONTH_NAMES: [&[u8; 3]; 12] = [
        b"Jan", b"Feb", b"Mar", b"Apr", b"May", b"Jun", b"Jul", b"Aug", b"Sep", b"Oct", b"Nov",
        b"Dec",
    ];

    let mut buf: [u8; 29] = *b"---, -- --- ---- --:--:-- GMT";
    buf[..3].copy_from_slice(DAY_NAMES[weekday]);
    put2(&mut buf, 5, day as u64);
    buf[8..11].copy_from_slice(MONTH_NAMES[month - 1]);
    buf[12] = b'0' + (year / 1000 % 10) as u8;
    buf[13] = b'0' + (year / 100 % 10) as u8;
    buf[14] = b'0' + (year / 10 % 10) as u8;
    buf[15] = b'0' + (year % 10) as u8;
    put2(&mut buf, 17, secs_of_day / 3600);
    put2(&mut buf, 20, secs_of_day % 3600 / 60);
    put2(&mut buf, 23, secs_of_day % 60);
    buf
}

fn put2(buf: &mut [u8; 29], at: usize, value: u64) {
    buf[at] = b'0' + (value / 10 % 10) as u8;
    buf[at + 1] = b'0' + (value % 10) as u8;
}

/// Civil date for a day count since the Unix epoch.
///
/// Returns `(year, month 1..=12, day 1..=31, weekday 0=Mon..6=Sun)`. The
/// conversion runs in 400-year cycles anchored at 2000-03-01, the first day
/// after a leap February in a mod-400 year.
fn civil_date(epoch_days: u64) -> (i64, usize, i64, usize) {
    const LEAPOCH: i64 = 11017;
    const DAYS_PER_400Y: i64 = 365 * 400 + 97;
    const DAYS_PER_100Y: i64 = 365 * 100 + 24;
    const DAYS_PER_4Y: i64 = 365 * 4 + 1;
    // March-first month lengths, so the leap day lands at the cycle end.
    const MONTH_DAYS: [i64; 12] = [31, 30, 31, 30, 31, 31, 30, 31, 30, 31, 31, 29];

    let days = epoch_days as i64 - LEAPOCH;

    let mut qc_cycles = days / DAYS_PER_400Y;
    let mut rem = days % DAYS_PER_400Y;
    if rem < 0 {
        rem += DAYS_PER_400Y;
        qc_cycles -= 1;
    }

    let mut c_cycles = rem / DAYS_PER_100Y;
    if c_cycles == 4 {
        c_cycles -= 1;
    }
    rem -= c_cycles * DAYS_PER_100Y;

    let mut q_cycles = rem / DAYS_PER_4Y;
    if q_cycles == 25 {
        q_cycles -= 1;
    }
    rem -= q_cycles * DAYS_PER_4Y;

    let mut years = rem / 365;
    if years == 4 {
        years -= 1;
    }
    rem -= years * 365;

    let mut year = 2000 + years + 4 * q_cycles + 100 * c_cycles + 400 * qc_cycles;

    let mut month = 0;
    for len in MONTH_DAYS {
        month += 1;
        if rem < len {
            break;
        }
        rem -= len;
    }
    let day = rem + 1;
    // Shift from the March-anchored cycle back to calendar months.
    let month = if month + 2 > 12 {
        year += 1;
        month - 10
    } else {
        month + 2
    };

    // LEAPOCH fell on a Wednesday.
    let weekday = (days + 2).rem_euclid(7) as usize;

    (year, month, day, weekday)
}
