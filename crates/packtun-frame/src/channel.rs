//! Identity types shared by every protocol variant built on Packer.

/// 2-byte sentinel identifying the protocol variant framed on a stream.
pub type Magic = [u8; 2];

/// Protocol version carried in every frame header.
pub type Version = u16;

/// Logical channel tag. Values are fixed per protocol; there is no negotiation.
pub type Channel = u8;
