use codec::{Decode, DecodeWithMemTracking, Encode, MaxEncodedLen};
use scale_info::TypeInfo;
use serde::{Deserialize, Serialize};

/// This enum serves as the single source of truth for asset types across the
/// migration stack, enabling type-safe interactions between the position
/// migrator, its market and venue adapters, and the runtime token pallets.
///
/// - `Native`: The system's native token (managed by pallet-balances).
/// - `Local(u32)`: Local fungible assets (managed by pallet-assets).
#[derive(
  Clone,
  Copy,
  Debug,
  Decode,
  DecodeWithMemTracking,
  Default,
  Encode,
  Eq,
  MaxEncodedLen,
  Ord,
  PartialEq,
  PartialOrd,
  TypeInfo,
  Serialize,
  Deserialize,
)]
pub enum AssetKind {
  /// Native token managed by pallet-balances
  #[default]
  Native,
  /// Local asset managed by pallet-assets
  Local(u32),
}

impl From<u32> for AssetKind {
  fn from(asset_id: u32) -> Self {
    AssetKind::Local(asset_id)
  }
}

impl AssetKind {
  pub fn is_native(&self) -> bool {
    matches!(self, AssetKind::Native)
  }

  pub fn local_id(&self) -> Option<u32> {
    match self {
      AssetKind::Native => None,
      AssetKind::Local(id) => Some(*id),
    }
  }
}
