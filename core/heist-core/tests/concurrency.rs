use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use heist_core::ports::{MemoryLedger, RecordingSink, StaticDirectory};
use heist_core::{
    EngineSettings, HeistError, HeistService, MemoryStore, ServiceParts, Target, TargetCatalog,
};

const COMMUNITY: &str = "guild-1";

fn service() -> HeistService {
    HeistService::new(
        EngineSettings::default(),
        ServiceParts {
            store: Arc::new(MemoryStore::new()),
            ledger: Arc::new(MemoryLedger::new(100_000)),
            directory: Arc::new(StaticDirectory::new()),
            sink: Arc::new(RecordingSink::new()),
        },
    )
}

#[test]
fn concurrent_starts_admit_exactly_one() {
    let service = service();
    let barrier = Arc::new(Barrier::new(12));
    let handles: Vec<_> = (0..12)
        .map(|idx| {
            let service = service.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.start_event(COMMUNITY, &format!("member-{idx}"))
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let started = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(started, 1);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|err| *err == HeistError::AlreadyInProgress));

    service.reset_event(COMMUNITY);
}

#[test]
fn concurrent_distinct_joins_all_land() {
    let service = service();
    service.start_event(COMMUNITY, "boss").unwrap();

    let barrier = Arc::new(Barrier::new(20));
    let handles: Vec<_> = (0..20)
        .map(|idx| {
            let service = service.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.join_event(COMMUNITY, &format!("member-{idx}"))
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().expect("join");
    }

    let crew = service.session(COMMUNITY).unwrap().crew;
    assert_eq!(crew.len(), 21);
    assert_eq!(crew[0], "boss");
    service.reset_event(COMMUNITY);
}

#[test]
fn concurrent_same_member_joins_once() {
    let service = service();
    service.start_event(COMMUNITY, "boss").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || service.join_event(COMMUNITY, "rook"))
        })
        .collect();
    let joined = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|result| result.is_ok())
        .count();

    assert_eq!(joined, 1);
    assert_eq!(service.session(COMMUNITY).unwrap().crew.len(), 2);
    assert_eq!(service.balance(COMMUNITY, "rook"), 100_000 - 1_500);
    service.reset_event(COMMUNITY);
}

#[test]
fn vault_stays_within_bounds_under_theft_and_recovery() {
    let catalog = Arc::new(TargetCatalog::new(Arc::new(MemoryStore::new())));
    catalog
        .upsert(Target {
            community_id: COMMUNITY.to_string(),
            target_id: "bank".to_string(),
            crew_size: 4,
            success: 0.5,
            vault: 50_000,
            vault_max: 50_000,
        })
        .unwrap();

    let thieves: Vec<_> = (0..4)
        .map(|_| {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                for _ in 0..100 {
                    catalog
                        .apply_theft(COMMUNITY, "bank", 3_000, 4)
                        .expect("theft");
                }
            })
        })
        .collect();
    let recovery = {
        let catalog = Arc::clone(&catalog);
        thread::spawn(move || {
            for _ in 0..100 {
                catalog.recover_all(1.04);
                thread::sleep(Duration::from_millis(1));
            }
        })
    };
    for thief in thieves {
        thief.join().unwrap();
    }
    recovery.join().unwrap();

    let bank = catalog.get(COMMUNITY, "bank").unwrap();
    assert!((2_000..=50_000).contains(&bank.vault));
}
