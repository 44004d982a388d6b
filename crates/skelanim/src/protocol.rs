//! # Game Packet Types
//!
//! The tags the demo puts in [`Packet::packet_type`](skelanim_networking::Packet::packet_type).
//! Only `Message` has handlers today; the rest are reserved so both peers
//! agree on the numbering.

use crate::error::AppError;

/// Game-level packet tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PacketType {
    /// Player registration.
    Register = 0,
    /// Chat line.
    Message = 1,
    /// Match start.
    StartGame = 2,
    /// Actor spawned.
    PlaySpawnActor = 3,
    /// Actor state update.
    PlayActorState = 4,
    /// Actor removed.
    PlayActorDestroy = 5,
    /// Player input.
    PlayInput = 6,
    /// Player state update.
    PlayPlayerState = 7,
    /// Player left.
    QuitGame = 8,
}

impl PacketType {
    /// Every tag, in wire order.
    pub const ALL: [Self; 9] = [
        Self::Register,
        Self::Message,
        Self::StartGame,
        Self::PlaySpawnActor,
        Self::PlayActorState,
        Self::PlayActorDestroy,
        Self::PlayInput,
        Self::PlayPlayerState,
        Self::QuitGame,
    ];
}

impl From<PacketType> for i32 {
    fn from(packet_type: PacketType) -> Self {
        packet_type as i32
    }
}

impl TryFrom<i32> for PacketType {
    type Error = AppError;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        usize::try_from(tag)
            .ok()
            .and_then(|slot| Self::ALL.get(slot).copied())
            .ok_or(AppError::UnknownPacketType(tag))
    }
}
