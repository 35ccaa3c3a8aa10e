mod address;
mod frame;

pub use address::Ax25Address;
pub use frame::{
    Ax25Frame, Direction, FrameClass, Modulo, OutboundFrame, SFrameKind, UFrameKind,
    PID_NO_LAYER3,
};
