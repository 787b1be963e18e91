pub mod emulator;
pub mod protocol;
pub mod session;
pub mod signing;
pub mod transport;

pub use emulator::{ConfirmMode, EmulatedDevice, SignMode};
pub use protocol::{DeviceCommand, DeviceEvent, DeviceResponse};
pub use session::{DeviceSessionController, SigningSession};
pub use signing::SigningCoordinator;
pub use transport::{DeviceTransport, TcpDeviceTransport};
