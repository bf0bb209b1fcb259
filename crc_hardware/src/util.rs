use std::io::ErrorKind;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Fill `buf` from `read_some`, stopping early once `timeout` has passed
/// without the buffer filling up. Returns the number of bytes read.
///
/// `read_some` follows `std::io::Read::read` semantics; `TimedOut` and
/// `WouldBlock` count as "nothing yet", `Ok(0)` ends the read.
pub fn read_full_with_timeout(
    mut read_some: impl FnMut(&mut [u8]) -> std::io::Result<usize>,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize> {
    let deadline = Instant::now() + timeout;
    let mut filled = 0;
    while filled < buf.len() {
        match read_some(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            break;
        }
    }
    Ok(filled)
}
