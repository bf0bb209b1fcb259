use std::io;
use std::time::{Duration, Instant};

use crc_hardware::error::HwError;
use crc_hardware::util::read_full_with_timeout;

#[test]
fn fills_buffer_from_partial_reads() {
    let mut chunks = vec![vec![1u8, 2], vec![3u8, 4, 5]].into_iter();
    let mut buf = [0u8; 5];
    let n = read_full_with_timeout(
        |b| {
            let chunk = chunks.next().unwrap_or_default();
            b[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        },
        &mut buf,
        Duration::from_millis(50),
    )
    .expect("read ok");
    assert_eq!(n, 5);
    assert_eq!(buf, [1, 2, 3, 4, 5]);
}

#[test]
fn short_read_stops_at_deadline() {
    let mut sent = false;
    let mut buf = [0u8; 11];
    let start = Instant::now();
    let n = read_full_with_timeout(
        |b| {
            if sent {
                std::thread::sleep(Duration::from_millis(1));
                Err(io::Error::new(io::ErrorKind::TimedOut, "quiet"))
            } else {
                sent = true;
                b[0] = 0x46;
                Ok(1)
            }
        },
        &mut buf,
        Duration::from_millis(20),
    )
    .expect("timeout is not an error");
    assert_eq!(n, 1);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn hard_io_errors_propagate() {
    let mut buf = [0u8; 4];
    let err = read_full_with_timeout(
        |_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        &mut buf,
        Duration::from_millis(20),
    )
    .expect_err("expected io error");
    match err {
        HwError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn timed_out_io_maps_to_timeout() {
    let err = HwError::from(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
    assert!(matches!(err, HwError::Timeout), "{err:?}");
    let err = HwError::from(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
    assert!(matches!(err, HwError::Io(_)), "{err:?}");
}
