pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Byte-oriented command/response link to the calibrator.
///
/// `read` returns as soon as `buf` is full or the link's byte timeout
/// elapses, so a short count means the device stopped talking.
pub trait SerialLink {
    fn clear_input(&mut self) -> Result<(), BoxError>;
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BoxError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BoxError>;
    fn bytes_waiting(&mut self) -> Result<usize, BoxError>;
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn clear_input(&mut self) -> Result<(), BoxError> {
        (**self).clear_input()
    }
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        (**self).write_all(bytes)
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BoxError> {
        (**self).read(buf)
    }
    fn bytes_waiting(&mut self) -> Result<usize, BoxError> {
        (**self).bytes_waiting()
    }
}

/// Opens fresh links; used at start and when re-opening a silent device.
pub trait Connector {
    fn open(&mut self) -> Result<Box<dyn SerialLink + Send>, BoxError>;
}
