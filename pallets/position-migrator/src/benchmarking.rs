extern crate alloc;

use crate::*;
use frame::deps::frame_benchmarking::{v2::*, whitelisted_caller};
use frame::deps::frame_support::BoundedVec;
use frame::deps::frame_system::RawOrigin;

#[benchmarks]
mod benches {
  use super::*;

  #[benchmark]
  fn migrate() {
    let caller: T::AccountId = whitelisted_caller();
    let debt: Balance = 1_000_000;

    let (market, venue) = T::BenchmarkHelper::prepare_borrow_leg(&caller, debt)
      .expect("benchmark helper must provide a funded borrow leg");
    let token = T::BenchmarkHelper::prepare_collateral(&caller, debt)
      .expect("benchmark helper must provide collateral");
    AcceptedCollateral::<T>::insert(token, ());

    let plan = MigrationPlan {
      borrows: BoundedVec::truncate_from(alloc::vec![BorrowSource {
        market,
        amount: AmountRequest::UseCurrentBalance,
        venue,
        method: AcquisitionMethod::Loan,
      }]),
      collateral: BoundedVec::truncate_from(alloc::vec![CollateralItem {
        token,
        amount: AmountRequest::UseCurrentBalance,
      }]),
      target_base: T::TargetProtocol::base_asset(),
    };

    #[extrinsic_call]
    migrate(RawOrigin::Signed(caller), plan);

    assert!(!ExecutionLock::<T>::exists());
    assert!(!PendingLeg::<T>::exists());
  }

  #[benchmark]
  fn sweep() {
    let caller: T::AccountId = whitelisted_caller();
    let orchestrator = Pallet::<T>::account_id();
    let token = T::BenchmarkHelper::prepare_collateral(&orchestrator, 10_000)
      .expect("benchmark helper must provide a stray balance");

    #[extrinsic_call]
    sweep(RawOrigin::Signed(caller), token);
  }

  #[cfg(test)]
  use crate::mock::{Test, new_test_ext};
  #[cfg(test)]
  impl_benchmark_test_suite!(Pallet, new_test_ext(), Test);
}
