use serde::{Deserialize, Serialize};

use wagestream_core::{
    AccountId, Aggregate, AggregateRoot, DomainError, DomainResult, Timestamp,
};
use wagestream_events::Event;

use crate::health::{HealthStatus, HealthThresholds};

/// Aggregate root: EmployerTreasury.
///
/// `available_balance` is always derived (`total − allocated`) and never stored,
/// so it cannot drift from the two balances it is computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployerTreasury {
    owner: AccountId,
    total_balance: u64,
    allocated_balance: u64,
    reserve_balance: u64,
    version: u64,
}

impl EmployerTreasury {
    /// Validate a treasury initialization and produce its creation event.
    pub fn initialize(cmd: &InitializeTreasury, now: Timestamp) -> TreasuryInitialized {
        TreasuryInitialized {
            owner: cmd.owner.clone(),
            initial_deposit: cmd.initial_deposit,
            at: now,
        }
    }

    pub fn initialized(event: &TreasuryInitialized) -> Self {
        Self {
            owner: event.owner.clone(),
            total_balance: event.initial_deposit,
            allocated_balance: 0,
            reserve_balance: 0,
            version: 1,
        }
    }

    pub fn owner(&self) -> &AccountId {
        &self.owner
    }

    pub fn total_balance(&self) -> u64 {
        self.total_balance
    }

    pub fn allocated_balance(&self) -> u64 {
        self.allocated_balance
    }

    pub fn reserve_balance(&self) -> u64 {
        self.reserve_balance
    }

    /// Funds free for new streams.
    pub fn available_balance(&self) -> u64 {
        self.total_balance.saturating_sub(self.allocated_balance)
    }

    /// Funds the employer may take out: available minus the reserve floor.
    pub fn withdrawable_balance(&self) -> u64 {
        self.available_balance().saturating_sub(self.reserve_balance)
    }

    /// `available / total` as a floor percentage; an empty treasury reports 0.
    pub fn health_ratio(&self) -> u8 {
        if self.total_balance == 0 {
            return 0;
        }
        let pct = self.available_balance() as u128 * 100 / self.total_balance as u128;
        pct as u8
    }

    pub fn health(&self, thresholds: &HealthThresholds) -> HealthStatus {
        thresholds.classify(self.health_ratio())
    }

    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.allocated_balance > self.total_balance {
            return Err(DomainError::desync(format!(
                "treasury {}: allocated {} exceeds total {}",
                self.owner, self.allocated_balance, self.total_balance
            )));
        }
        Ok(())
    }

    pub fn to_record(&self) -> TreasuryRecord {
        TreasuryRecord {
            owner: self.owner.clone(),
            balance: self.total_balance,
            allocated: self.allocated_balance,
            available: self.available_balance(),
            reserve: self.reserve_balance,
        }
    }

    /// Rebuild a treasury from an external ledger record.
    ///
    /// The reported `available` must agree with `balance − allocated`.
    pub fn from_record(record: &TreasuryRecord) -> DomainResult<Self> {
        let treasury = Self {
            owner: record.owner.clone(),
            total_balance: record.balance,
            allocated_balance: record.allocated,
            reserve_balance: record.reserve,
            version: 0,
        };
        treasury.check_invariants()?;
        if treasury.available_balance() != record.available {
            return Err(DomainError::desync(format!(
                "treasury {}: reported available {} but balance − allocated is {}",
                record.owner,
                record.available,
                treasury.available_balance()
            )));
        }
        Ok(treasury)
    }
}

impl AggregateRoot for EmployerTreasury {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.owner
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Wire shape of a treasury as reported by the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryRecord {
    pub owner: AccountId,
    pub balance: u64,
    pub allocated: u64,
    pub available: u64,
    pub reserve: u64,
}

/// Command: InitializeTreasury.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeTreasury {
    pub owner: AccountId,
    pub initial_deposit: u64,
}

/// Commands against an existing treasury.
///
/// `Allocate`, `Release` and `Disburse` are issued by stream operations only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreasuryCommand {
    Deposit { amount: u64 },
    Withdraw { amount: u64 },
    SetReserve { amount: u64 },
    Allocate { amount: u64 },
    Release { amount: u64 },
    Disburse { amount: u64 },
}

/// Event: TreasuryInitialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryInitialized {
    pub owner: AccountId,
    pub initial_deposit: u64,
    pub at: Timestamp,
}

/// Event: a balance movement on an existing treasury.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryMovement {
    pub owner: AccountId,
    pub amount: u64,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreasuryEvent {
    Initialized(TreasuryInitialized),
    Deposited(TreasuryMovement),
    Withdrawn(TreasuryMovement),
    ReserveSet(TreasuryMovement),
    /// Moved from available to allocated.
    Allocated(TreasuryMovement),
    /// Moved from allocated back to available.
    Released(TreasuryMovement),
    /// Paid out of allocated funds to an employee.
    Disbursed(TreasuryMovement),
}

impl TreasuryEvent {
    pub fn owner(&self) -> &AccountId {
        match self {
            TreasuryEvent::Initialized(e) => &e.owner,
            TreasuryEvent::Deposited(e)
            | TreasuryEvent::Withdrawn(e)
            | TreasuryEvent::ReserveSet(e)
            | TreasuryEvent::Allocated(e)
            | TreasuryEvent::Released(e)
            | TreasuryEvent::Disbursed(e) => &e.owner,
        }
    }
}

impl Event for TreasuryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TreasuryEvent::Initialized(_) => "treasury.initialized",
            TreasuryEvent::Deposited(_) => "treasury.deposited",
            TreasuryEvent::Withdrawn(_) => "treasury.withdrawn",
            TreasuryEvent::ReserveSet(_) => "treasury.reserve_set",
            TreasuryEvent::Allocated(_) => "treasury.allocated",
            TreasuryEvent::Released(_) => "treasury.released",
            TreasuryEvent::Disbursed(_) => "treasury.disbursed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> Timestamp {
        match self {
            TreasuryEvent::Initialized(e) => e.at,
            TreasuryEvent::Deposited(e)
            | TreasuryEvent::Withdrawn(e)
            | TreasuryEvent::ReserveSet(e)
            | TreasuryEvent::Allocated(e)
            | TreasuryEvent::Released(e)
            | TreasuryEvent::Disbursed(e) => e.at,
        }
    }
}

impl Aggregate for EmployerTreasury {
    type Command = TreasuryCommand;
    type Event = TreasuryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TreasuryEvent::Initialized(e) => {
                *self = EmployerTreasury::initialized(e);
                return;
            }
            TreasuryEvent::Deposited(e) => {
                self.total_balance += e.amount;
            }
            TreasuryEvent::Withdrawn(e) => {
                self.total_balance -= e.amount;
            }
            TreasuryEvent::ReserveSet(e) => {
                self.reserve_balance = e.amount;
            }
            TreasuryEvent::Allocated(e) => {
                self.allocated_balance += e.amount;
            }
            TreasuryEvent::Released(e) => {
                self.allocated_balance -= e.amount;
            }
            TreasuryEvent::Disbursed(e) => {
                self.allocated_balance -= e.amount;
                self.total_balance -= e.amount;
            }
        }

        self.version += 1;
    }

    fn handle(
        &self,
        command: &Self::Command,
        now: Timestamp,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let movement = |amount: u64| TreasuryMovement {
            owner: self.owner.clone(),
            amount,
            at: now,
        };

        match *command {
            TreasuryCommand::Deposit { amount } => {
                require_positive(amount, "deposit")?;
                if self.total_balance.checked_add(amount).is_none() {
                    return Err(DomainError::invalid_input("deposit overflows treasury balance"));
                }
                Ok(vec![TreasuryEvent::Deposited(movement(amount))])
            }
            TreasuryCommand::Withdraw { amount } => {
                require_positive(amount, "withdrawal")?;
                let limit = self.withdrawable_balance();
                if amount > limit {
                    return Err(DomainError::insufficient_funds(amount, limit));
                }
                Ok(vec![TreasuryEvent::Withdrawn(movement(amount))])
            }
            TreasuryCommand::SetReserve { amount } => {
                if amount > self.total_balance {
                    return Err(DomainError::invalid_input(format!(
                        "reserve {amount} exceeds treasury balance {}",
                        self.total_balance
                    )));
                }
                Ok(vec![TreasuryEvent::ReserveSet(movement(amount))])
            }
            TreasuryCommand::Allocate { amount } => {
                require_positive(amount, "allocation")?;
                let available = self.available_balance();
                if amount > available {
                    return Err(DomainError::insufficient_funds(amount, available));
                }
                Ok(vec![TreasuryEvent::Allocated(movement(amount))])
            }
            TreasuryCommand::Release { amount } => {
                if amount == 0 {
                    return Ok(vec![]);
                }
                self.require_allocated(amount, "release")?;
                Ok(vec![TreasuryEvent::Released(movement(amount))])
            }
            TreasuryCommand::Disburse { amount } => {
                if amount == 0 {
                    return Ok(vec![]);
                }
                self.require_allocated(amount, "disburse")?;
                Ok(vec![TreasuryEvent::Disbursed(movement(amount))])
            }
        }
    }
}

impl EmployerTreasury {
    /// Stream-driven movements only ever touch funds the stream allocated;
    /// asking for more means the books disagree.
    fn require_allocated(&self, amount: u64, action: &str) -> DomainResult<()> {
        if amount > self.allocated_balance {
            return Err(DomainError::desync(format!(
                "treasury {}: cannot {action} {amount}, only {} allocated",
                self.owner, self.allocated_balance
            )));
        }
        Ok(())
    }
}

fn require_positive(amount: u64, what: &str) -> DomainResult<()> {
    if amount == 0 {
        return Err(DomainError::invalid_input(format!("{what} amount must be positive")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NOW: Timestamp = 1_700_000_000;

    fn treasury(initial: u64) -> EmployerTreasury {
        let cmd = InitializeTreasury {
            owner: AccountId::parse("acme").unwrap(),
            initial_deposit: initial,
        };
        EmployerTreasury::initialized(&EmployerTreasury::initialize(&cmd, NOW))
    }

    fn run(t: &mut EmployerTreasury, cmd: TreasuryCommand) -> DomainResult<()> {
        let events = t.handle(&cmd, NOW)?;
        for e in &events {
            t.apply(e);
        }
        Ok(())
    }

    #[test]
    fn allocation_is_bounded_by_available() {
        let mut t = treasury(100);
        run(&mut t, TreasuryCommand::Allocate { amount: 60 }).unwrap();
        assert_eq!(t.allocated_balance(), 60);
        assert_eq!(t.available_balance(), 40);

        let before = t.clone();
        let err = run(&mut t, TreasuryCommand::Allocate { amount: 50 }).unwrap_err();
        assert_eq!(err, DomainError::insufficient_funds(50, 40));
        assert_eq!(t, before);
    }

    #[test]
    fn deposit_then_withdraw_round_trips() {
        let mut t = treasury(250);
        run(&mut t, TreasuryCommand::Deposit { amount: 75 }).unwrap();
        assert_eq!(t.total_balance(), 325);
        run(&mut t, TreasuryCommand::Withdraw { amount: 75 }).unwrap();
        assert_eq!(t.total_balance(), 250);
    }

    #[test]
    fn zero_amounts_are_invalid_input() {
        let mut t = treasury(10);
        assert!(matches!(
            run(&mut t, TreasuryCommand::Deposit { amount: 0 }),
            Err(DomainError::InvalidInput(_))
        ));
        assert!(matches!(
            run(&mut t, TreasuryCommand::Withdraw { amount: 0 }),
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[test]
    fn withdrawal_respects_allocation_and_reserve() {
        let mut t = treasury(100);
        run(&mut t, TreasuryCommand::Allocate { amount: 30 }).unwrap();
        run(&mut t, TreasuryCommand::SetReserve { amount: 20 }).unwrap();
        assert_eq!(t.withdrawable_balance(), 50);
        assert_eq!(
            run(&mut t, TreasuryCommand::Withdraw { amount: 51 }),
            Err(DomainError::insufficient_funds(51, 50))
        );
        run(&mut t, TreasuryCommand::Withdraw { amount: 50 }).unwrap();
        assert_eq!(t.total_balance(), 50);
        assert!(matches!(
            run(&mut t, TreasuryCommand::SetReserve { amount: 51 }),
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[test]
    fn disbursement_leaves_available_unchanged() {
        let mut t = treasury(100);
        run(&mut t, TreasuryCommand::Allocate { amount: 60 }).unwrap();
        run(&mut t, TreasuryCommand::Disburse { amount: 25 }).unwrap();
        assert_eq!(t.total_balance(), 75);
        assert_eq!(t.allocated_balance(), 35);
        assert_eq!(t.available_balance(), 40);
    }

    #[test]
    fn over_release_is_desync() {
        let mut t = treasury(100);
        run(&mut t, TreasuryCommand::Allocate { amount: 10 }).unwrap();
        assert!(matches!(
            run(&mut t, TreasuryCommand::Release { amount: 11 }),
            Err(DomainError::LedgerDesync(_))
        ));
        assert_eq!(t.handle(&TreasuryCommand::Release { amount: 0 }, NOW), Ok(vec![]));
    }

    #[test]
    fn health_ratio_floors_percentage() {
        let mut t = treasury(300);
        run(&mut t, TreasuryCommand::Allocate { amount: 200 }).unwrap();
        assert_eq!(t.health_ratio(), 33);
        assert_eq!(t.health(&HealthThresholds::default()), HealthStatus::Warning);
        assert_eq!(treasury(0).health_ratio(), 0);
        assert_eq!(treasury(5).health_ratio(), 100);
    }

    #[test]
    fn record_must_be_self_consistent() {
        let mut t = treasury(100);
        run(&mut t, TreasuryCommand::Allocate { amount: 40 }).unwrap();
        let record = t.to_record();
        assert_eq!(record.available, 60);
        assert!(EmployerTreasury::from_record(&record).is_ok());

        let mut over = record.clone();
        over.allocated = 101;
        assert!(matches!(
            EmployerTreasury::from_record(&over),
            Err(DomainError::LedgerDesync(_))
        ));

        let mut mismatch = record;
        mismatch.available = 61;
        assert!(matches!(
            EmployerTreasury::from_record(&mismatch),
            Err(DomainError::LedgerDesync(_))
        ));
    }

    fn any_command() -> impl Strategy<Value = TreasuryCommand> {
        prop_oneof![
            (0u64..1_000).prop_map(|amount| TreasuryCommand::Deposit { amount }),
            (0u64..1_000).prop_map(|amount| TreasuryCommand::Withdraw { amount }),
            (0u64..1_000).prop_map(|amount| TreasuryCommand::SetReserve { amount }),
            (0u64..1_000).prop_map(|amount| TreasuryCommand::Allocate { amount }),
            (0u64..1_000).prop_map(|amount| TreasuryCommand::Release { amount }),
            (0u64..1_000).prop_map(|amount| TreasuryCommand::Disburse { amount }),
        ]
    }

    proptest! {
        /// Property: whatever sequence of commands is attempted, accepted ones
        /// keep allocated ≤ total and rejected ones change nothing.
        #[test]
        fn invariants_hold_under_any_command_sequence(
            initial in 0u64..5_000,
            commands in prop::collection::vec(any_command(), 1..40),
        ) {
            let mut t = treasury(initial);
            for cmd in commands {
                let before = t.clone();
                if run(&mut t, cmd).is_err() {
                    prop_assert_eq!(&t, &before);
                }
                prop_assert!(t.check_invariants().is_ok());
                prop_assert_eq!(t.available_balance() + t.allocated_balance(), t.total_balance());
            }
        }
    }
}
