//! End-to-end ledger properties
//! Balance conservation, settlement idempotence, and concurrent placement.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;
use wagerbook::ledger::{LegRequest, NewMatch, Role, SettlementState, Side};
use wagerbook::{Ledger, LedgerError, WagerConfig};

fn open_ledger(dir: &tempfile::TempDir, starting_balance: Decimal) -> Ledger {
    let mut config = WagerConfig::for_testing(dir.path().join("db"));
    config.ledger.starting_balance = starting_balance;
    Ledger::open(&config).expect("Failed to open ledger")
}

fn add_match(ledger: &Ledger, id: &str) {
    let start = Utc::now() + Duration::hours(1);
    ledger
        .matches
        .create_match(NewMatch {
            id: Some(id.to_string()),
            side_a_team: format!("{}-home", id),
            side_b_team: format!("{}-away", id),
            sport_type: "football".to_string(),
            start_time: start,
            end_time: start + Duration::hours(2),
        })
        .expect("Failed to create match");
}

fn leg(match_id: &str, side: Side) -> LegRequest {
    LegRequest {
        match_id: match_id.to_string(),
        side,
    }
}

#[test]
fn test_single_leg_win_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(1000));
    ledger.register("u1", Role::User, None).unwrap();
    add_match(&ledger, "m1");

    let ticket = ledger
        .tickets
        .create_ticket("u1", &[leg("m1", Side::A)], dec!(200))
        .unwrap();
    assert_eq!(ticket.legs[0].rate, dec!(2.00));
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(800));

    let report = ledger.matches.set_winner("m1", Side::A).unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.total_paid, dec!(400.00));
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(1200.00));
}

#[test]
fn test_single_leg_loss_pays_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(1000));
    ledger.register("u1", Role::User, None).unwrap();
    add_match(&ledger, "m1");

    let ticket = ledger
        .tickets
        .create_ticket("u1", &[leg("m1", Side::A)], dec!(200))
        .unwrap();
    ledger.matches.set_winner("m1", Side::B).unwrap();

    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(800));
    let stored = ledger.tickets.get_ticket(&ticket.id, "u1").unwrap();
    assert!(matches!(
        stored.settlement,
        SettlementState::Settled { payout, .. } if payout.is_zero()
    ));
    assert!(stored.legs[0].paid);
}

#[test]
fn test_draw_refunds_stake() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(1000));
    ledger.register("u1", Role::User, None).unwrap();
    add_match(&ledger, "m1");

    ledger
        .tickets
        .create_ticket("u1", &[leg("m1", Side::B)], dec!(123.45))
        .unwrap();
    ledger.matches.set_draw("m1").unwrap();

    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(1000.00));
}

#[test]
fn test_multi_leg_waits_for_last_match() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(1000));
    ledger.register("u1", Role::User, None).unwrap();
    ledger.register("u2", Role::User, None).unwrap();
    add_match(&ledger, "m1");
    add_match(&ledger, "m2");

    // u2 backs m2 side A first so u1's m2/A leg freezes at 1.50
    ledger
        .tickets
        .create_ticket("u2", &[leg("m2", Side::A)], dec!(10))
        .unwrap();
    let ticket = ledger
        .tickets
        .create_ticket("u1", &[leg("m1", Side::A), leg("m2", Side::A)], dec!(100))
        .unwrap();
    assert_eq!(ticket.legs[0].rate, dec!(2.00));
    assert_eq!(ticket.legs[1].rate, dec!(1.50));

    let quotes = ledger.odds.snapshot("m2").unwrap();
    assert_eq!((quotes.legs_a, quotes.legs_b), (2, 0));
    assert_eq!(quotes.rate_a, dec!(1.33));
    assert_eq!(quotes.rate_b, dec!(4.00));

    let first = ledger.matches.set_winner("m1", Side::A).unwrap();
    assert_eq!(first.pending, 1);
    let stored = ledger.tickets.get_ticket(&ticket.id, "u1").unwrap();
    assert!(stored.legs.iter().all(|l| !l.paid));
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(900));

    ledger.matches.set_winner("m2", Side::A).unwrap();
    // 100 × 2.00 × 1.50
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(1200.00));
}

#[test]
fn test_multi_leg_with_one_loss_pays_zero() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(1000));
    ledger.register("u1", Role::User, None).unwrap();
    add_match(&ledger, "m1");
    add_match(&ledger, "m2");

    ledger
        .tickets
        .create_ticket("u1", &[leg("m1", Side::A), leg("m2", Side::A)], dec!(100))
        .unwrap();
    ledger.matches.set_winner("m1", Side::A).unwrap();
    ledger.matches.set_winner("m2", Side::B).unwrap();

    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(900));
}

#[test]
fn test_settlement_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(1000));
    ledger.register("u1", Role::User, None).unwrap();
    add_match(&ledger, "m1");
    let ticket = ledger
        .tickets
        .create_ticket("u1", &[leg("m1", Side::A)], dec!(200))
        .unwrap();

    ledger.matches.set_winner("m1", Side::A).unwrap();
    for _ in 0..3 {
        let report = ledger.settlement.resolve_match("m1").unwrap();
        assert_eq!(report.settled, 0);
        assert_eq!(report.already_settled, 1);
    }
    ledger.settlement.settle_ticket(&ticket.id).unwrap();
    ledger.settlement.recover_unsettled().unwrap();

    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(1200.00));
}

#[test]
fn test_second_declaration_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(1000));
    add_match(&ledger, "m1");

    ledger.matches.set_draw("m1").unwrap();
    assert!(matches!(
        ledger.matches.set_winner("m1", Side::A),
        Err(LedgerError::AlreadyResolved(_))
    ));
}

#[test]
fn test_resolved_match_refuses_new_legs() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(1000));
    ledger.register("u1", Role::User, None).unwrap();
    add_match(&ledger, "m1");
    ledger.matches.set_winner("m1", Side::A).unwrap();

    assert!(matches!(
        ledger.tickets.create_ticket("u1", &[leg("m1", Side::A)], dec!(10)),
        Err(LedgerError::MatchClosed(_))
    ));
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(1000));
}

#[test]
fn test_concurrent_placement_never_overdraws() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(open_ledger(&dir, dec!(1000)));
    ledger.register("u1", Role::User, None).unwrap();
    add_match(&ledger, "m1");
    add_match(&ledger, "m2");

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                let match_id = if i % 2 == 0 { "m1" } else { "m2" };
                ledger
                    .tickets
                    .create_ticket("u1", &[leg(match_id, Side::A)], dec!(300))
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => accepted += 1,
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    // floor(1000 / 300)
    assert_eq!(accepted, 3);
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(100));
    assert_eq!(ledger.tickets.list_tickets("u1").unwrap().len(), 3);

    let pools = ledger.matches.get_match("m1").unwrap().pool.legs_a
        + ledger.matches.get_match("m2").unwrap().pool.legs_a;
    assert_eq!(pools, 3);
}

#[test]
fn test_balances_are_conserved() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir, dec!(500));
    let users = ["u1", "u2", "u3"];
    for user in users {
        ledger.register(user, Role::User, None).unwrap();
    }
    for id in ["m1", "m2", "m3"] {
        add_match(&ledger, id);
    }

    let placements = [
        ("u1", vec![leg("m1", Side::A)], dec!(50)),
        ("u2", vec![leg("m1", Side::B)], dec!(75.25)),
        ("u3", vec![leg("m1", Side::A), leg("m2", Side::B)], dec!(20)),
        ("u1", vec![leg("m2", Side::A), leg("m3", Side::A)], dec!(33.33)),
        ("u2", vec![leg("m3", Side::B)], dec!(100)),
    ];
    let mut staked = Decimal::ZERO;
    for (user, legs, stake) in &placements {
        ledger.tickets.create_ticket(user, legs, *stake).unwrap();
        staked += *stake;
    }

    let total = |ledger: &Ledger| -> Decimal {
        users
            .iter()
            .map(|u| ledger.balances.balance(u).unwrap())
            .sum()
    };
    assert_eq!(total(&ledger), dec!(1500) - staked);

    ledger.matches.set_winner("m1", Side::A).unwrap();
    ledger.matches.set_draw("m2").unwrap();
    ledger.matches.set_winner("m3", Side::B).unwrap();

    let paid: Decimal = ledger
        .tickets
        .list_all_tickets()
        .unwrap()
        .iter()
        .map(|t| match t.settlement {
            SettlementState::Settled { payout, .. } => payout,
            _ => panic!("Ticket {} left unsettled", t.id),
        })
        .sum();

    assert_eq!(total(&ledger), dec!(1500) - staked + paid);
    for user in users {
        assert!(ledger.balances.balance(user).unwrap() >= Decimal::ZERO);
    }
}

#[test]
fn test_blocked_ticket_does_not_abort_pass() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WagerConfig::for_testing(dir.path().join("db"));
    config.ledger.starting_balance = dec!(1000);
    config.storage.lock_timeout_ms = 100;
    let ledger = Arc::new(Ledger::open(&config).unwrap());
    ledger.register("u1", Role::User, None).unwrap();
    ledger.register("u2", Role::User, None).unwrap();
    add_match(&ledger, "m1");

    let first = ledger
        .tickets
        .create_ticket("u1", &[leg("m1", Side::A)], dec!(100))
        .unwrap();
    let second = ledger
        .tickets
        .create_ticket("u2", &[leg("m1", Side::A)], dec!(100))
        .unwrap();
    assert_eq!(second.legs[0].rate, dec!(1.50));

    // Hold u2's account lock for the whole settlement pass
    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder = {
        let ledger = ledger.clone();
        thread::spawn(move || {
            ledger
                .balances
                .with_user_lock("u2", |_, _| {
                    locked_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap();
        })
    };
    locked_rx.recv().unwrap();

    let report = ledger.matches.set_winner("m1", Side::A).unwrap();
    release_tx.send(()).unwrap();
    holder.join().unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.total_paid, dec!(200.00));
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(1100.00));
    assert_eq!(ledger.balances.balance("u2").unwrap(), dec!(900));
    assert!(ledger
        .tickets
        .get_ticket(&first.id, "u1")
        .unwrap()
        .settlement
        .is_settled());
    let blocked = ledger.tickets.get_ticket(&second.id, "u2").unwrap();
    assert!(matches!(
        blocked.settlement,
        SettlementState::Open | SettlementState::Settling { .. }
    ));

    let recovered = ledger.settlement.recover_unsettled().unwrap();
    assert_eq!(recovered.settled, 1);
    assert_eq!(recovered.failed, 0);
    assert_eq!(ledger.balances.balance("u2").unwrap(), dec!(1050.00));

    let again = ledger.settlement.recover_unsettled().unwrap();
    assert_eq!(again.scanned, 0);
    assert_eq!(ledger.balances.balance("u2").unwrap(), dec!(1050.00));
}

#[test]
fn test_conservation_under_concurrent_placement_and_declaration() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(open_ledger(&dir, dec!(500)));
    let users = ["u1", "u2", "u3", "u4"];
    let match_ids = ["m1", "m2", "m3", "m4"];
    for user in users {
        ledger.register(user, Role::User, None).unwrap();
    }
    for id in match_ids {
        add_match(&ledger, id);
    }

    let bettors: Vec<_> = users
        .iter()
        .enumerate()
        .map(|(u, user)| {
            let ledger = ledger.clone();
            let user = user.to_string();
            thread::spawn(move || {
                let mut staked = Decimal::ZERO;
                for j in 0..40usize {
                    let side = if (u + j) % 2 == 0 { Side::A } else { Side::B };
                    let mut legs = vec![leg(match_ids[j % 4], side)];
                    if j % 3 == 0 {
                        legs.push(leg(match_ids[(j + 1) % 4], Side::A));
                    }
                    let stake = dec!(7.50) + Decimal::from(u as u64);
                    match ledger.tickets.create_ticket(&user, &legs, stake) {
                        Ok(_) => staked += stake,
                        Err(LedgerError::MatchClosed(_))
                        | Err(LedgerError::InsufficientFunds { .. }) => {}
                        Err(e) => panic!("Unexpected placement error: {:?}", e),
                    }
                }
                staked
            })
        })
        .collect();

    let declarer = {
        let ledger = ledger.clone();
        thread::spawn(move || {
            let mut failed = 0;
            for (i, id) in match_ids.iter().enumerate() {
                thread::sleep(StdDuration::from_millis(5));
                let report = match i {
                    0 => ledger.matches.set_winner(id, Side::A),
                    1 => ledger.matches.set_draw(id),
                    2 => ledger.matches.set_winner(id, Side::B),
                    _ => ledger.matches.set_winner(id, Side::A),
                }
                .unwrap();
                failed += report.failed;
            }
            failed
        })
    };

    let staked: Decimal = bettors.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(declarer.join().unwrap(), 0);

    let tickets = ledger.tickets.list_all_tickets().unwrap();
    let ticket_stakes: Decimal = tickets.iter().map(|t| t.total_stake).sum();
    assert_eq!(ticket_stakes, staked);

    let paid: Decimal = tickets
        .iter()
        .map(|t| match t.settlement {
            SettlementState::Settled { payout, .. } => payout,
            ref other => panic!("Ticket {} left in {:?}", t.id, other),
        })
        .sum();
    assert!(tickets.iter().all(|t| t.legs.iter().all(|l| l.paid)));

    let total: Decimal = users
        .iter()
        .map(|u| ledger.balances.balance(u).unwrap())
        .sum();
    assert_eq!(total, dec!(2000) - staked + paid);
    for user in users {
        assert!(ledger.balances.balance(user).unwrap() >= Decimal::ZERO);
    }
}

#[test]
fn test_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WagerConfig::for_testing(dir.path().join("db"));
    config.ledger.starting_balance = dec!(1000);

    let ticket_id = {
        let ledger = Ledger::open(&config).unwrap();
        ledger.register("u1", Role::User, None).unwrap();
        add_match(&ledger, "m1");
        add_match(&ledger, "m2");
        let ticket = ledger
            .tickets
            .create_ticket("u1", &[leg("m1", Side::A), leg("m2", Side::A)], dec!(100))
            .unwrap();
        ledger.matches.set_winner("m1", Side::A).unwrap();
        ticket.id
    };

    config.storage.clear_on_start = false;
    let ledger = Ledger::open(&config).unwrap();
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(900));
    let stored = ledger.tickets.get_ticket(&ticket_id, "u1").unwrap();
    assert_eq!(stored.settlement, SettlementState::Open);

    ledger.matches.set_winner("m2", Side::A).unwrap();
    assert_eq!(ledger.balances.balance("u1").unwrap(), dec!(1300.00));
}
