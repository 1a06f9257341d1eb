use codec::DecodeWithMemTracking;
use polkadot_sdk::frame_support::{
  BoundedVec, CloneNoBound, DebugNoBound, EqNoBound, PartialEqNoBound, pallet_prelude::*,
};

// Re-export the shared asset vocabulary as the single source of truth
pub use primitives::{AssetKind, Balance};

/// Identifier of a legacy market holding user debt and/or collateral
pub type MarketId = u32;

/// Identifier of an external liquidity venue
pub type VenueId = u32;

/// Failure code reported by a source market instead of a raised error
pub type MarketErrorCode = u8;

/// Requested amount for a repay or collateral leg.
///
/// `UseCurrentBalance` resolves to the live balance/debt at the instant the
/// corresponding step executes, never at plan-construction time. An explicit
/// variant is used so that no literal amount can collide with a sentinel.
#[derive(
  Clone,
  Copy,
  Debug,
  Decode,
  DecodeWithMemTracking,
  Encode,
  Eq,
  MaxEncodedLen,
  PartialEq,
  TypeInfo,
)]
pub enum AmountRequest {
  /// A literal amount
  Exact(Balance),
  /// Resolve to the live balance/debt when the step executes
  UseCurrentBalance,
}

/// How temporary liquidity is acquired for a borrow leg
#[derive(
  Clone,
  Copy,
  Debug,
  Decode,
  DecodeWithMemTracking,
  Encode,
  Eq,
  MaxEncodedLen,
  PartialEq,
  TypeInfo,
)]
pub enum AcquisitionMethod {
  /// Venue advances the repay token and demands it back plus a fee
  Loan,
  /// Venue delivers an exact output of the repay token against a
  /// venue-computed input of its counter-asset
  Swap,
}

/// One debt position to close, and the venue that temporarily funds it
#[derive(
  Clone,
  Copy,
  Debug,
  Decode,
  DecodeWithMemTracking,
  Encode,
  Eq,
  MaxEncodedLen,
  PartialEq,
  TypeInfo,
)]
pub struct BorrowSource {
  /// Market the debt lives in
  pub market: MarketId,
  /// Amount to repay
  pub amount: AmountRequest,
  /// Venue advancing the temporary liquidity for this leg
  pub venue: VenueId,
  /// Acquisition primitive to use at the venue
  pub method: AcquisitionMethod,
}

/// A borrow leg whose amount has been fixed to a concrete balance.
///
/// Sentinels are resolved exactly once, at entry; the continuation only ever
/// carries resolved legs.
#[derive(
  Clone,
  Copy,
  Debug,
  Decode,
  DecodeWithMemTracking,
  Encode,
  Eq,
  MaxEncodedLen,
  PartialEq,
  TypeInfo,
)]
pub struct ResolvedBorrow {
  pub market: MarketId,
  pub amount: Balance,
  pub venue: VenueId,
  pub method: AcquisitionMethod,
}

/// One collateral position to move into the target protocol
#[derive(
  Clone,
  Copy,
  Debug,
  Decode,
  DecodeWithMemTracking,
  Encode,
  Eq,
  MaxEncodedLen,
  PartialEq,
  TypeInfo,
)]
pub struct CollateralItem {
  /// Wrapped collateral token as held in the source market
  pub token: AssetKind,
  /// Amount to transfer
  pub amount: AmountRequest,
}

/// A caller-supplied migration plan: ordered borrow legs, collateral items,
/// and the target protocol's base asset. Validated once at entry and never
/// mutated afterwards.
#[derive(
  CloneNoBound,
  DebugNoBound,
  Decode,
  DecodeWithMemTracking,
  Encode,
  EqNoBound,
  PartialEqNoBound,
  TypeInfo,
)]
#[scale_info(skip_type_params(S, C))]
pub struct MigrationPlan<S: Get<u32>, C: Get<u32>> {
  /// Debt legs, executed strictly in order
  pub borrows: BoundedVec<BorrowSource, S>,
  /// Collateral items, settled strictly in order after the last leg
  pub collateral: BoundedVec<CollateralItem, C>,
  /// Base asset of the target protocol, in which all legs settle
  pub target_base: AssetKind,
}

/// The explicit continuation value threaded through every suspension
/// boundary.
///
/// It is SCALE-encoded and handed to the liquidity venue by value; the venue
/// must echo it back unchanged into the continuation entry point, where it is
/// decoded and re-validated against the recorded hash. Nothing of it persists
/// once the execution unit ends.
#[derive(CloneNoBound, DebugNoBound, Decode, Encode, EqNoBound, PartialEqNoBound)]
pub struct MigrationContext<AccountId: Clone + core::fmt::Debug + Eq + PartialEq, S: Get<u32>, C: Get<u32>> {
  /// Account whose position is being migrated
  pub initiator: AccountId,
  /// Resolved borrow legs, in plan order
  pub borrows: BoundedVec<ResolvedBorrow, S>,
  /// Collateral items, resolved lazily at settlement
  pub collateral: BoundedVec<CollateralItem, C>,
  /// Base asset of the target protocol
  pub target_base: AssetKind,
  /// Running settlement total: principal plus fees accumulated so far
  pub total: Balance,
  /// Current step index into `borrows`
  pub step: u32,
}

/// Venue recorded for the in-flight leg, plus the hash of the encoded
/// context it must echo back. Present only between liquidity acquisition and
/// the venue's re-entry.
#[derive(Clone, Debug, Decode, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo)]
pub struct PendingCallback<Hash> {
  pub venue: VenueId,
  pub context_hash: Hash,
}

/// Capabilities of a legacy market the migrator settles against.
///
/// Markets report repay/redeem failures as numeric codes rather than raised
/// errors; the orchestrator wraps them and aborts the execution unit.
pub trait SourceMarketApi<AccountId> {
  /// Underlying debt token of the market
  fn underlying(market: MarketId) -> Option<AssetKind>;

  /// Live debt of `who` in `market`
  fn debt_balance(market: MarketId, who: &AccountId) -> Balance;

  /// Repay `amount` of the market's underlying out of `payer`'s funds,
  /// reducing `beneficiary`'s debt
  fn repay_on_behalf(
    market: MarketId,
    payer: &AccountId,
    beneficiary: &AccountId,
    amount: Balance,
  ) -> Result<(), MarketErrorCode>;

  /// Burn `amount` of the wrapped collateral `token` held by `who` and
  /// credit the underlying asset, returning what was credited
  fn redeem_to_underlying(
    token: AssetKind,
    who: &AccountId,
    amount: Balance,
  ) -> Result<(AssetKind, Balance), MarketErrorCode>;
}

/// Capabilities of an external venue able to advance temporary liquidity.
///
/// Both request primitives are synchronous from the orchestrator's point of
/// view but re-enter the orchestrator's continuation entry point before
/// returning, and treat underpayment on unwind as failure of the whole call.
pub trait LiquidityVenueApi<AccountId> {
  /// The venue's token pair. Determines which side a leg is owed in.
  fn token_pair(venue: VenueId) -> Option<(AssetKind, AssetKind)>;

  /// Account the venue settles into
  fn venue_account(venue: VenueId) -> Option<AccountId>;

  /// Advance `amount` of `token` to `recipient`, re-entering the loan
  /// continuation with the quoted fee and `context`
  fn request_loan(
    venue: VenueId,
    token: AssetKind,
    amount: Balance,
    recipient: &AccountId,
    context: &[u8],
  ) -> DispatchResult;

  /// Deliver exactly `amount_out` of `token_out` to `recipient`, re-entering
  /// the swap continuation with the computed counter-asset input owed and
  /// `context`
  fn request_swap_exact_out(
    venue: VenueId,
    token_out: AssetKind,
    amount_out: Balance,
    recipient: &AccountId,
    context: &[u8],
  ) -> DispatchResult;
}

/// Capabilities of the destination lending protocol
pub trait TargetProtocolApi<AccountId> {
  /// The protocol's base asset, in which new debt is issued
  fn base_asset() -> AssetKind;

  /// Supply `amount` of `asset` out of `payer`'s funds, credited to
  /// `beneficiary`'s position
  fn supply_on_behalf(
    payer: &AccountId,
    beneficiary: &AccountId,
    asset: AssetKind,
    amount: Balance,
  ) -> DispatchResult;

  /// Borrow `amount` of the base asset against `debtor`'s position,
  /// crediting `recipient`
  fn borrow_on_behalf(debtor: &AccountId, recipient: &AccountId, amount: Balance)
  -> DispatchResult;
}

/// Wrap/unwrap conversion for the chain's native asset
pub trait NativeWrapperApi<AccountId> {
  /// Asset the native token wraps into
  fn wrapped_asset() -> AssetKind;

  /// Convert `amount` of `who`'s native balance into the wrapped asset
  fn wrap(who: &AccountId, amount: Balance) -> DispatchResult;

  /// Convert `amount` of `who`'s wrapped balance back into the native asset
  fn unwrap(who: &AccountId, amount: Balance) -> DispatchResult;
}
