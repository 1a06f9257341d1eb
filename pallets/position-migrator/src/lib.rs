//! Position Migrator Pallet
//!
//! Atomic migration of leveraged lending positions into a target protocol.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub use pallet::*;

pub mod types;
pub use types::*;


#[cfg(feature = "runtime-benchmarks")]
mod benchmarking;

pub mod weights;
pub use weights::WeightInfo;

/// Helper for benchmarking — seeds markets, venues and collateral that don't
/// exist in benchmark context
#[cfg(feature = "runtime-benchmarks")]
pub trait BenchmarkHelper<AccountId> {
  /// Prepare a market/venue pair with `debt` owed by `who`, funded well
  /// enough for a loan leg, returning the ids to put in a plan
  fn prepare_borrow_leg(
    who: &AccountId,
    debt: primitives::Balance,
  ) -> Result<(types::MarketId, types::VenueId), frame::deps::sp_runtime::DispatchError>;

  /// Prepare a redeemable collateral token held by `who`
  fn prepare_collateral(
    who: &AccountId,
    amount: primitives::Balance,
  ) -> Result<primitives::AssetKind, frame::deps::sp_runtime::DispatchError>;
}

#[frame::pallet]
pub mod pallet {
  use super::WeightInfo;
  use crate::types::{
    AcquisitionMethod, AmountRequest, AssetKind, Balance, LiquidityVenueApi, MarketId,
    MigrationContext, MigrationPlan, NativeWrapperApi, PendingCallback, ResolvedBorrow,
    SourceMarketApi, TargetProtocolApi, VenueId,
  };
  use alloc::vec::Vec;
  use codec::{Decode, Encode};
  use frame::deps::{
    frame_support::{
      PalletId,
      storage::with_transaction,
      traits::{
        fungible::{Inspect as NativeInspect, Mutate as NativeMutate},
        fungibles::{Inspect as FungiblesInspect, Mutate as FungiblesMutate},
        tokens::Preservation,
      },
    },
    sp_runtime::{
      DispatchError, TransactionOutcome,
      traits::{AccountIdConversion, Hash},
    },
  };
  use frame::prelude::*;

  #[pallet::config]
  pub trait Config: frame_system::Config {
    /// Asset management interface for fungible tokens
    type Assets: FungiblesInspect<Self::AccountId, AssetId = u32, Balance = Balance>
      + FungiblesMutate<Self::AccountId>;
    /// Native currency interface
    type Currency: NativeInspect<Self::AccountId, Balance = Balance>
      + NativeMutate<Self::AccountId>;
    /// Legacy markets holding the debt and collateral being migrated
    type SourceMarkets: SourceMarketApi<Self::AccountId>;
    /// External venues advancing temporary liquidity
    type LiquidityVenues: LiquidityVenueApi<Self::AccountId>;
    /// Destination lending protocol
    type TargetProtocol: TargetProtocolApi<Self::AccountId>;
    /// Wrap/unwrap conversion for the chain's native asset
    type NativeWrapper: NativeWrapperApi<Self::AccountId>;
    /// Pallet ID for account derivation
    #[pallet::constant]
    type PalletId: Get<PalletId>;
    /// Recipient of swept stray balances, fixed at configuration time
    #[pallet::constant]
    type SweepRecipient: Get<Self::AccountId>;
    /// Maximum number of borrow legs per plan
    #[pallet::constant]
    type MaxBorrowSources: Get<u32>;
    /// Maximum number of collateral items per plan
    #[pallet::constant]
    type MaxCollateralItems: Get<u32>;
    /// Weight information for extrinsics
    type WeightInfo: WeightInfo;
    /// Helper for benchmarking
    #[cfg(feature = "runtime-benchmarks")]
    type BenchmarkHelper: crate::BenchmarkHelper<Self::AccountId>;
  }

  pub type MigrationPlanOf<T> =
    MigrationPlan<<T as Config>::MaxBorrowSources, <T as Config>::MaxCollateralItems>;

  pub type MigrationContextOf<T> = MigrationContext<
    <T as frame_system::Config>::AccountId,
    <T as Config>::MaxBorrowSources,
    <T as Config>::MaxCollateralItems,
  >;

  /// The pallet module.
  ///
  /// ## Execution model
  /// A migration runs as one indivisible execution unit. `migrate` acquires
  /// temporary liquidity for the first borrow leg; the venue synchronously
  /// re-enters the continuation entry points before its call returns, so the
  /// whole step chain is strictly nested inside the original dispatch. The
  /// unwind repays venues in exact reverse order of acquisition, funded by a
  /// single borrow of the settlement total from the target protocol.
  ///
  /// ## Safety
  /// - **Reentrancy lock**: exactly one migration chain may be live per
  ///   component instance; entry requires the lock idle, continuations
  ///   require it engaged.
  /// - **Callback validation**: each re-entry must come from the recorded
  ///   venue and echo the exact continuation it was handed; everything else
  ///   is rejected without side effects.
  /// - **All-or-nothing**: the whole chain runs inside a storage
  ///   transaction; any failure at any nesting depth rolls back every
  ///   balance and storage effect since entry.
  #[pallet::pallet]
  pub struct Pallet<T>(PhantomData<T>);

  /// Reentrancy guard: engaged while exactly one migration chain is live
  #[pallet::storage]
  pub type ExecutionLock<T: Config> = StorageValue<_, (), OptionQuery>;

  /// Venue recorded for the in-flight leg plus the context hash it must echo
  /// back. Empty outside an active acquisition.
  #[pallet::storage]
  pub type PendingLeg<T: Config> =
    StorageValue<_, PendingCallback<<T as frame_system::Config>::Hash>, OptionQuery>;

  /// Collateral tokens accepted for migration (populated at genesis,
  /// immutable thereafter)
  #[pallet::storage]
  #[pallet::getter(fn accepted_collateral)]
  pub type AcceptedCollateral<T: Config> =
    StorageMap<_, Blake2_128Concat, AssetKind, (), OptionQuery>;

  #[pallet::event]
  #[pallet::generate_deposit(pub(super) fn deposit_event)]
  pub enum Event<T: Config> {
    /// Source debt repaid on the user's behalf during a migration step
    SourceDebtRepaid {
      step: u32,
      market: MarketId,
      amount: Balance,
    },
    /// Migration settled: collateral moved and the settlement total borrowed
    MigrationCompleted {
      who: T::AccountId,
      collateral: Vec<(AssetKind, Balance)>,
      total_settled: Balance,
    },
    /// Stray balance transferred to the configured sweep recipient
    AssetsSwept {
      asset: AssetKind,
      amount: Balance,
      destination: T::AccountId,
    },
  }

  #[pallet::error]
  pub enum Error<T> {
    /// Guard violated at entry or callback
    Reentrancy,
    /// Caller is not the venue recorded for the current step, or the echoed
    /// continuation does not match the one handed out
    UnauthorizedCallback,
    /// A source market rejected a repay or redeem call with the given code
    SourceMarketError { step: u8, code: u8 },
    /// Collateral could not be moved from the user to the orchestrator
    CollateralTransferError,
    /// Sweep transfer failed
    SweepFailure,
    /// Plan carries no borrow legs
    EmptyPlan,
    /// Plan base asset does not match the target protocol
    BaseAssetMismatch,
    /// Collateral token is not in the accepted set
    CollateralNotAccepted,
    /// Venue pair cannot fund the leg in the target base asset
    VenuePairMismatch,
    /// Source market is not recognised
    UnknownMarket,
    /// Liquidity venue is not recognised
    UnknownVenue,
    /// A borrow leg resolved to a zero amount
    ZeroAmount,
    /// The venue returned without re-entering the continuation
    CallbackNotEntered,
    /// Arithmetic overflow in settlement accounting
    ArithmeticOverflow,
  }

  #[pallet::call]
  impl<T: Config> Pallet<T> {
    /// Migrate a leveraged position into the target protocol.
    ///
    /// Repays each borrow leg with venue-advanced liquidity, moves the
    /// plan's collateral, and borrows the accumulated settlement total back
    /// from the target protocol on the caller's behalf. Either every effect
    /// lands or none does; a failed migration leaves every balance exactly
    /// as before the call.
    #[pallet::call_index(0)]
    #[pallet::weight(T::WeightInfo::migrate())]
    pub fn migrate(origin: OriginFor<T>, plan: MigrationPlanOf<T>) -> DispatchResult {
      let who = ensure_signed(origin)?;

      ensure!(!ExecutionLock::<T>::exists(), Error::<T>::Reentrancy);

      with_transaction(|| match Self::execute_migration(&who, &plan) {
        Ok(()) => TransactionOutcome::Commit(Ok(())),
        Err(e) => TransactionOutcome::Rollback(Err(e)),
      })
    }

    /// Transfer a stray balance held by the orchestrator to the configured
    /// sweep recipient.
    ///
    /// Permissionless, but refused while a migration is in flight so that
    /// in-transit funds cannot be drained mid-chain.
    #[pallet::call_index(1)]
    #[pallet::weight(T::WeightInfo::sweep())]
    pub fn sweep(origin: OriginFor<T>, asset: AssetKind) -> DispatchResult {
      ensure_signed(origin)?;

      ensure!(!ExecutionLock::<T>::exists(), Error::<T>::Reentrancy);

      let orchestrator = Self::account_id();
      let destination = T::SweepRecipient::get();
      let amount = Self::spendable_balance(asset, &orchestrator);

      if amount > 0 {
        Self::transfer_asset(asset, &orchestrator, &destination, amount)
          .map_err(|_| Error::<T>::SweepFailure)?;

        Self::deposit_event(Event::AssetsSwept {
          asset,
          amount,
          destination,
        });
      }

      Ok(())
    }
  }

  impl<T: Config> Pallet<T> {
    /// Get the pallet's account ID (derived from PalletId)
    pub fn account_id() -> T::AccountId {
      T::PalletId::get().into_account_truncating()
    }

    /// Continuation entry for a loan-funded leg.
    ///
    /// Invoked by the liquidity venue while the orchestrator is suspended
    /// inside its acquisition call. `fee` is the venue's quoted fee for this
    /// leg, in the loaned token.
    pub fn on_loan_callback(venue: VenueId, fee: Balance, context: &[u8]) -> DispatchResult {
      let ctx = Self::authorize_callback(venue, context)?;
      let leg = Self::current_leg(&ctx)?;

      let owed = leg
        .amount
        .checked_add(fee)
        .ok_or(Error::<T>::ArithmeticOverflow)?;

      Self::continue_chain(ctx, owed)
    }

    /// Continuation entry for a swap-funded leg.
    ///
    /// `owed_input` is the venue-computed, fee-inclusive input amount of the
    /// counter-asset owed for the exact-output swap.
    pub fn on_swap_callback(
      venue: VenueId,
      owed_input: Balance,
      context: &[u8],
    ) -> DispatchResult {
      let ctx = Self::authorize_callback(venue, context)?;
      Self::current_leg(&ctx)?;

      Self::continue_chain(ctx, owed_input)
    }

    /// Validate a plan once at entry; nothing is mutated on rejection.
    fn validate_plan(plan: &MigrationPlanOf<T>) -> DispatchResult {
      ensure!(!plan.borrows.is_empty(), Error::<T>::EmptyPlan);
      ensure!(
        plan.target_base == T::TargetProtocol::base_asset(),
        Error::<T>::BaseAssetMismatch
      );

      for item in plan.collateral.iter() {
        ensure!(
          AcceptedCollateral::<T>::contains_key(item.token),
          Error::<T>::CollateralNotAccepted
        );
      }

      // Every leg must be owed in the base asset, otherwise the settlement
      // borrow could not fund the unwind.
      for source in plan.borrows.iter() {
        let owed = Self::owed_token(source.market, source.venue, source.method)?;
        ensure!(owed == plan.target_base, Error::<T>::VenuePairMismatch);
      }

      Ok(())
    }

    /// Fix every borrow sentinel to the live debt at this instant. Amounts
    /// are read exactly once and never re-read.
    fn resolve_borrows(
      who: &T::AccountId,
      plan: &MigrationPlanOf<T>,
    ) -> Result<BoundedVec<ResolvedBorrow, T::MaxBorrowSources>, DispatchError> {
      let mut resolved = Vec::with_capacity(plan.borrows.len());

      for source in plan.borrows.iter() {
        let amount = match source.amount {
          AmountRequest::Exact(amount) => amount,
          AmountRequest::UseCurrentBalance => T::SourceMarkets::debt_balance(source.market, who),
        };
        ensure!(amount > 0, Error::<T>::ZeroAmount);

        resolved.push(ResolvedBorrow {
          market: source.market,
          amount,
          venue: source.venue,
          method: source.method,
        });
      }

      // Same bound as the plan, so this cannot truncate
      Ok(BoundedVec::truncate_from(resolved))
    }

    fn execute_migration(who: &T::AccountId, plan: &MigrationPlanOf<T>) -> DispatchResult {
      Self::validate_plan(plan)?;
      let borrows = Self::resolve_borrows(who, plan)?;

      let ctx = MigrationContext {
        initiator: who.clone(),
        borrows,
        collateral: plan.collateral.clone(),
        target_base: plan.target_base,
        total: 0,
        step: 0,
      };

      ExecutionLock::<T>::put(());
      let result = Self::acquire_liquidity(&ctx);
      // The guard is released on every exit path; a failure below is also
      // rolled back by the surrounding storage transaction.
      ExecutionLock::<T>::kill();

      result
    }

    /// Record the expected callback for the current leg and request
    /// liquidity from its venue. The venue re-enters the continuation before
    /// this call returns.
    fn acquire_liquidity(ctx: &MigrationContextOf<T>) -> DispatchResult {
      let leg = Self::current_leg(ctx)?;
      let underlying = T::SourceMarkets::underlying(leg.market).ok_or(Error::<T>::UnknownMarket)?;
      let orchestrator = Self::account_id();

      let context = ctx.encode();
      PendingLeg::<T>::put(PendingCallback {
        venue: leg.venue,
        context_hash: T::Hashing::hash(&context),
      });

      match leg.method {
        AcquisitionMethod::Loan => {
          T::LiquidityVenues::request_loan(
            leg.venue,
            underlying,
            leg.amount,
            &orchestrator,
            &context,
          )?;
        }
        AcquisitionMethod::Swap => {
          T::LiquidityVenues::request_swap_exact_out(
            leg.venue,
            underlying,
            leg.amount,
            &orchestrator,
            &context,
          )?;
        }
      }

      // A venue that returned without re-entering left the leg unsettled
      ensure!(!PendingLeg::<T>::exists(), Error::<T>::CallbackNotEntered);

      Ok(())
    }

    /// Validate a venue re-entry and recover the continuation it echoes.
    ///
    /// The context is decoded and re-validated rather than trusted: the
    /// caller must be the recorded venue and the payload must hash to the
    /// exact continuation handed out for the in-flight leg.
    fn authorize_callback(
      venue: VenueId,
      context: &[u8],
    ) -> Result<MigrationContextOf<T>, DispatchError> {
      ensure!(ExecutionLock::<T>::exists(), Error::<T>::Reentrancy);

      let pending = PendingLeg::<T>::take().ok_or(Error::<T>::Reentrancy)?;
      ensure!(pending.venue == venue, Error::<T>::UnauthorizedCallback);
      ensure!(
        T::Hashing::hash(context) == pending.context_hash,
        Error::<T>::UnauthorizedCallback
      );

      MigrationContextOf::<T>::decode(&mut &context[..])
        .map_err(|_| Error::<T>::UnauthorizedCallback.into())
    }

    fn current_leg(ctx: &MigrationContextOf<T>) -> Result<ResolvedBorrow, DispatchError> {
      ctx
        .borrows
        .get(ctx.step as usize)
        .copied()
        .ok_or_else(|| Error::<T>::UnauthorizedCallback.into())
    }

    /// Token a leg is owed in: the loaned token itself for loans, the
    /// counter side of the venue pair for exact-output swaps.
    fn owed_token(
      market: MarketId,
      venue: VenueId,
      method: AcquisitionMethod,
    ) -> Result<AssetKind, DispatchError> {
      let underlying = T::SourceMarkets::underlying(market).ok_or(Error::<T>::UnknownMarket)?;
      let (side_a, side_b) =
        T::LiquidityVenues::token_pair(venue).ok_or(Error::<T>::UnknownVenue)?;
      ensure!(
        side_a == underlying || side_b == underlying,
        Error::<T>::VenuePairMismatch
      );

      let owed = match method {
        AcquisitionMethod::Loan => underlying,
        AcquisitionMethod::Swap => {
          if side_a == underlying {
            side_b
          } else {
            side_a
          }
        }
      };

      Ok(owed)
    }

    /// Core of the continuation handler: settle the current leg's debt,
    /// advance or terminate the chain, then pay the venue exactly this leg's
    /// fee-inclusive amount.
    fn continue_chain(mut ctx: MigrationContextOf<T>, owed: Balance) -> DispatchResult {
      let leg = Self::current_leg(&ctx)?;
      let step = ctx.step;
      let orchestrator = Self::account_id();

      ctx.total = ctx
        .total
        .checked_add(owed)
        .ok_or(Error::<T>::ArithmeticOverflow)?;

      T::SourceMarkets::repay_on_behalf(leg.market, &orchestrator, &ctx.initiator, leg.amount)
        .map_err(|code| Error::<T>::SourceMarketError {
          step: step as u8,
          code,
        })?;

      Self::deposit_event(Event::SourceDebtRepaid {
        step,
        market: leg.market,
        amount: leg.amount,
      });

      if (ctx.step as usize) + 1 < ctx.borrows.len() {
        ctx.step += 1;
        Self::acquire_liquidity(&ctx)?;
      } else {
        Self::settle(&ctx)?;
      }

      // Unwind: each frame repays only its own leg before returning to its
      // venue, so venues are settled last-opened, first-repaid.
      let owed_token = Self::owed_token(leg.market, leg.venue, leg.method)?;
      let venue_account =
        T::LiquidityVenues::venue_account(leg.venue).ok_or(Error::<T>::UnknownVenue)?;
      Self::transfer_asset(owed_token, &orchestrator, &venue_account, owed)?;

      Ok(())
    }

    /// Move the plan's collateral into the target protocol, then borrow the
    /// settlement total back out on the user's behalf.
    fn settle(ctx: &MigrationContextOf<T>) -> DispatchResult {
      let orchestrator = Self::account_id();
      let who = &ctx.initiator;
      let mut applied: Vec<(AssetKind, Balance)> = Vec::new();

      for (index, item) in ctx.collateral.iter().enumerate() {
        // Sentinels resolve against the live balance at this instant
        let amount = match item.amount {
          AmountRequest::Exact(amount) => amount,
          AmountRequest::UseCurrentBalance => Self::balance_of(item.token, who),
        };
        if amount == 0 {
          continue;
        }

        Self::transfer_asset(item.token, who, &orchestrator, amount)
          .map_err(|_| Error::<T>::CollateralTransferError)?;

        let (underlying, received) =
          T::SourceMarkets::redeem_to_underlying(item.token, &orchestrator, amount).map_err(
            |code| Error::<T>::SourceMarketError {
              step: index as u8,
              code,
            },
          )?;

        let (supply_asset, supply_amount) = if underlying.is_native() {
          // The target protocol only accepts the wrapped form
          T::NativeWrapper::wrap(&orchestrator, received)?;
          (T::NativeWrapper::wrapped_asset(), received)
        } else {
          (underlying, received)
        };

        T::TargetProtocol::supply_on_behalf(&orchestrator, who, supply_asset, supply_amount)?;
        applied.push((item.token, amount));
      }

      // The borrow that funds the unwind of every open venue leg
      T::TargetProtocol::borrow_on_behalf(who, &orchestrator, ctx.total)?;

      Self::deposit_event(Event::MigrationCompleted {
        who: who.clone(),
        collateral: applied,
        total_settled: ctx.total,
      });

      Ok(())
    }

    fn balance_of(asset: AssetKind, who: &T::AccountId) -> Balance {
      match asset {
        AssetKind::Native => <T::Currency as NativeInspect<T::AccountId>>::balance(who),
        AssetKind::Local(id) => T::Assets::balance(id, who),
      }
    }

    /// Balance above the asset's minimum, which is retained for account
    /// liveness
    fn spendable_balance(asset: AssetKind, who: &T::AccountId) -> Balance {
      match asset {
        AssetKind::Native => {
          let balance = <T::Currency as NativeInspect<T::AccountId>>::balance(who);
          balance.saturating_sub(<T::Currency as NativeInspect<T::AccountId>>::minimum_balance())
        }
        AssetKind::Local(id) => {
          let balance = T::Assets::balance(id, who);
          balance.saturating_sub(T::Assets::minimum_balance(id))
        }
      }
    }

    fn transfer_asset(
      asset: AssetKind,
      from: &T::AccountId,
      to: &T::AccountId,
      amount: Balance,
    ) -> DispatchResult {
      match asset {
        AssetKind::Native => {
          <T::Currency as NativeMutate<T::AccountId>>::transfer(
            from,
            to,
            amount,
            Preservation::Expendable,
          )?;
        }
        AssetKind::Local(id) => {
          T::Assets::transfer(id, from, to, amount, Preservation::Expendable)?;
        }
      }

      Ok(())
    }
  }

  /// Genesis configuration — seeds the accepted collateral set and ensures
  /// the pallet account is ED-free
  #[pallet::genesis_config]
  pub struct GenesisConfig<T: Config> {
    pub accepted_collateral: Vec<AssetKind>,
    pub _marker: core::marker::PhantomData<T>,
  }

  impl<T: Config> Default for GenesisConfig<T> {
    fn default() -> Self {
      Self {
        accepted_collateral: Vec::new(),
        _marker: Default::default(),
      }
    }
  }

  #[pallet::genesis_build]
  impl<T: Config> BuildGenesisConfig for GenesisConfig<T> {
    fn build(&self) {
      for token in &self.accepted_collateral {
        AcceptedCollateral::<T>::insert(token, ());
      }
      // Pallet account survives zero native balance via provider reference
      frame_system::Pallet::<T>::inc_providers(&Pallet::<T>::account_id());
    }
  }
}
