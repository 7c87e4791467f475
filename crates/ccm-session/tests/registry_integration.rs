//! Integration tests for the chip session registry.
//!
//! These tests drive `ChipSessionRegistry` against the simulated backend and
//! check ownership counting, subordinate ordering and configuration through
//! the public interface only.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free behavior of
//! production code is checked through assertions.

use std::fs;
use std::sync::{Arc, Barrier};

use ccm_config::ConfigSettings;
use ccm_core::{ChipId, ChipVersion, Component, ConfigSource, OwnerContext, PlatformStep};
use ccm_session::sim::{AdapterStrategy, FaultPoint, Journal, SimBackend, SimEvent};
use ccm_session::{ChipSessionRegistry, SessionEvent};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;

// ============================================================================
// Test Helpers
// ============================================================================

const CHIP: ChipId = ChipId::PRIMARY;
const VERSION: ChipVersion = ChipVersion::new(2, 1, 4);

/// Registry over a simulated backend, reading its configuration from an
/// empty temporary directory.
fn setup(strategy: AdapterStrategy) -> (TempDir, Arc<SimBackend>, ChipSessionRegistry) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let backend = SimBackend::new(strategy);
    let registry =
        ChipSessionRegistry::new(backend.collaborators(), ConfigSettings::in_dir(dir.path()));
    (dir, backend, registry)
}

/// Create and destroy calls, in order.
fn lifecycle(journal: &Journal) -> Vec<SimEvent> {
    journal
        .events()
        .into_iter()
        .filter(|e| matches!(e, SimEvent::Create { .. } | SimEvent::Destroy { .. }))
        .collect()
}

/// Create call of a session built from the memory profile, which is what
/// `setup` produces while no file is written.
fn created(component: Component) -> SimEvent {
    let config_source = match component {
        Component::Adapter => None,
        _ => Some(ConfigSource::MemoryProfile),
    };
    SimEvent::Create {
        component,
        chip_id: CHIP,
        config_source,
    }
}

/// Configuration origin each create call received, in order.
fn create_sources(journal: &Journal) -> Vec<(Component, Option<ConfigSource>)> {
    journal
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::Create {
                component,
                config_source,
                ..
            } => Some((component, config_source)),
            _ => None,
        })
        .collect()
}

fn destroyed(component: Component) -> SimEvent {
    SimEvent::Destroy {
        component,
        chip_id: CHIP,
    }
}

fn configures(journal: &Journal) -> Vec<SimEvent> {
    journal
        .events()
        .into_iter()
        .filter(|e| matches!(e, SimEvent::Configure { .. }))
        .collect()
}

// ============================================================================
// Ownership Tests
// ============================================================================

#[test]
fn test_two_owners_share_one_session() {
    let (_dir, backend, registry) = setup(AdapterStrategy::InitManager);

    let mut h1 = registry.acquire(CHIP, "fm").expect("first acquire");
    assert_eq!(registry.owner_count(CHIP), 1);
    assert_eq!(
        lifecycle(backend.journal()),
        vec![
            created(Component::ConfigAbstraction),
            created(Component::Adapter),
            created(Component::AudioCoordinator),
        ]
    );

    let mut h2 = registry.acquire(CHIP, "bt").expect("second acquire");
    assert_eq!(registry.owner_count(CHIP), 2);
    assert_eq!(h1.chip_id(), h2.chip_id());
    assert_eq!(h1.generation(), h2.generation());
    assert_eq!(lifecycle(backend.journal()).len(), 3, "no new subordinates");

    registry.release(&mut h1).expect("first release");
    assert_eq!(registry.owner_count(CHIP), 1);
    assert_eq!(lifecycle(backend.journal()).len(), 3, "nothing destroyed");

    registry.release(&mut h2).expect("second release");
    assert_eq!(registry.owner_count(CHIP), 0);
    assert!(!registry.is_live(CHIP));
    assert_eq!(
        lifecycle(backend.journal())[3..],
        [
            destroyed(Component::AudioCoordinator),
            destroyed(Component::Adapter),
            destroyed(Component::ConfigAbstraction),
        ]
    );
}

#[test]
fn test_owner_count_tracks_acquires_minus_releases() {
    let (_dir, _backend, registry) = setup(AdapterStrategy::Direct);

    let mut handles: Vec<_> = (0..5)
        .map(|i| registry.acquire(CHIP, format!("owner-{i}")).unwrap())
        .collect();
    assert_eq!(registry.owner_count(CHIP), 5);

    for handle in handles.iter_mut().take(3) {
        registry.release(handle).unwrap();
    }
    assert_eq!(registry.owner_count(CHIP), 2);
    assert!(registry.is_live(CHIP));

    for handle in handles.iter_mut().skip(3) {
        registry.release(handle).unwrap();
    }
    assert_eq!(registry.owner_count(CHIP), 0);
    assert!(!registry.is_live(CHIP));
}

#[test]
fn test_first_owner_is_recorded() {
    let (_dir, _backend, registry) = setup(AdapterStrategy::Direct);

    let mut h1 = registry.acquire(CHIP, "fm").unwrap();
    let mut h2 = registry.acquire(CHIP, "bt").unwrap();

    let view = registry.session(CHIP).unwrap();
    assert_eq!(view.owner, Some(OwnerContext::new("fm")));
    assert_eq!(view.owner_count, 2);

    registry.release(&mut h1).unwrap();
    registry.release(&mut h2).unwrap();
}

#[test]
fn test_chips_are_independent() {
    let (_dir, backend, registry) = setup(AdapterStrategy::Direct);
    let other = ChipId::new(1);

    let mut h0 = registry.acquire(CHIP, "fm").unwrap();
    let mut h1 = registry.acquire(other, "fm").unwrap();

    registry.release(&mut h0).unwrap();
    assert!(!registry.is_live(CHIP));
    assert!(registry.is_live(other));
    assert_eq!(backend.journal().live(Component::Adapter, other), 1);
    assert_eq!(backend.journal().live(Component::Adapter, CHIP), 0);

    registry.release(&mut h1).unwrap();
    assert!(registry.sessions().iter().all(|s| !s.is_live()));
}

#[test]
fn test_rebuild_after_release_gets_new_generation() {
    let (_dir, backend, registry) = setup(AdapterStrategy::Direct);

    let mut old = registry.acquire(CHIP, "fm").unwrap();
    registry.release(&mut old).unwrap();

    let mut new = registry.acquire(CHIP, "bt").unwrap();
    assert_eq!(old.generation(), 1);
    assert_eq!(new.generation(), 2);
    assert_eq!(backend.journal().live(Component::Adapter, CHIP), 1);
    assert_eq!(
        backend
            .journal()
            .count(|e| matches!(e, SimEvent::Create { component: Component::Adapter, .. })),
        2
    );

    // The released handle does not reach the rebuilt session.
    assert!(registry.adapter(&old).is_err());
    assert!(registry.configure(&old).is_err());
    assert!(registry.adapter(&new).is_ok());

    registry.release(&mut new).unwrap();
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_acquire_constructs_once() {
    const OWNERS: usize = 8;
    let (_dir, backend, registry) = setup(AdapterStrategy::InitManager);
    let barrier = Barrier::new(OWNERS);

    let mut handles: Vec<_> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..OWNERS)
            .map(|i| {
                let registry = &registry;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    registry.acquire(CHIP, format!("owner-{i}")).unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(registry.owner_count(CHIP), OWNERS);
    for component in [
        Component::ConfigAbstraction,
        Component::Adapter,
        Component::AudioCoordinator,
    ] {
        assert_eq!(backend.journal().live(component, CHIP), 1, "{component}");
    }
    assert!(handles.iter().all(|h| h.generation() == 1));

    for handle in &mut handles {
        registry.release(handle).unwrap();
    }
    assert_eq!(backend.journal().live(Component::Adapter, CHIP), 0);
}

#[test]
fn test_concurrent_churn_keeps_counts_consistent() {
    let (_dir, backend, registry) = setup(AdapterStrategy::Direct);
    let barrier = Barrier::new(4);

    std::thread::scope(|s| {
        for i in 0..4 {
            let registry = &registry;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    let mut handle = registry.acquire(CHIP, format!("owner-{i}")).unwrap();
                    registry.release(&mut handle).unwrap();
                }
            });
        }
    });

    assert_eq!(registry.owner_count(CHIP), 0);
    for component in [
        Component::ConfigAbstraction,
        Component::Adapter,
        Component::AudioCoordinator,
    ] {
        assert_eq!(backend.journal().live(component, CHIP), 0, "{component}");
    }
}

// ============================================================================
// Global Initialization Tests
// ============================================================================

#[test]
fn test_global_init_order() {
    let (_dir, backend, registry) = setup(AdapterStrategy::InitManager);

    registry.global_init().unwrap();

    assert_eq!(
        backend.journal().events(),
        vec![
            SimEvent::PlatformInit {
                step: PlatformStep::Os
            },
            SimEvent::PlatformInit {
                step: PlatformStep::Filesystem
            },
            SimEvent::PlatformInit {
                step: PlatformStep::PowerManagement
            },
            SimEvent::ClassInit {
                component: Component::Adapter
            },
            SimEvent::ClassInit {
                component: Component::AudioCoordinator
            },
            SimEvent::ClassInit {
                component: Component::ConfigAbstraction
            },
        ]
    );
}

#[test]
fn test_direct_strategy_has_no_adapter_class_init() {
    let (_dir, backend, registry) = setup(AdapterStrategy::Direct);

    registry.global_init().unwrap();

    assert_eq!(
        backend.journal().count(|e| matches!(
            e,
            SimEvent::ClassInit {
                component: Component::Adapter
            }
        )),
        0
    );
    assert!(registry.is_initialized());
}

#[test]
fn test_global_init_runs_once_under_concurrency() {
    let (_dir, backend, registry) = setup(AdapterStrategy::InitManager);
    let barrier = Barrier::new(8);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                barrier.wait();
                registry.global_init().unwrap();
            });
        }
    });
    registry.global_init().unwrap();
    let mut handle = registry.acquire(CHIP, "fm").unwrap();

    assert_eq!(
        backend.journal().count(|e| matches!(e, SimEvent::PlatformInit { .. })),
        3
    );
    registry.release(&mut handle).unwrap();
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_configure_before_version_is_fatal() {
    let (_dir, _backend, registry) = setup(AdapterStrategy::Direct);
    let mut handle = registry.acquire(CHIP, "fm").unwrap();

    let err = registry.configure(&handle).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        ccm_core::CcmError::ChipVersionUnavailable { .. }
    ));

    registry.release(&mut handle).unwrap();
}

#[test]
fn test_configure_pushes_version_in_order() {
    let (_dir, backend, registry) = setup(AdapterStrategy::Direct);
    let mut handle = registry.acquire(CHIP, "fm").unwrap();

    assert!(!backend.power_up(CHIP, VERSION), "direct adapter has no callback");
    assert!(configures(backend.journal()).is_empty());

    let version = registry.configure(&handle).unwrap();
    assert_eq!(version, VERSION);
    assert_eq!(
        configures(backend.journal()),
        vec![
            SimEvent::Configure {
                component: Component::ConfigAbstraction,
                chip_id: CHIP,
                version: Some(VERSION),
            },
            SimEvent::Configure {
                component: Component::AudioCoordinator,
                chip_id: CHIP,
                version: Some(VERSION),
            },
        ]
    );
    assert_eq!(
        registry.session(CHIP).unwrap().chip_version,
        Some(VERSION)
    );

    registry.release(&mut handle).unwrap();
}

#[test]
fn test_version_ready_callback_configures_session() {
    let (_dir, backend, registry) = setup(AdapterStrategy::InitManager);
    let mut handle = registry.acquire(CHIP, "fm").unwrap();

    assert!(backend.power_up(CHIP, VERSION));

    assert_eq!(configures(backend.journal()).len(), 2);
    assert_eq!(
        backend.config_abstraction(CHIP).unwrap().version(),
        Some(VERSION)
    );
    assert_eq!(
        registry.session(CHIP).unwrap().chip_version,
        Some(VERSION)
    );

    registry.release(&mut handle).unwrap();
}

#[test]
fn test_stale_version_callback_is_ignored() {
    let (_dir, backend, registry) = setup(AdapterStrategy::InitManager);

    let mut first = registry.acquire(CHIP, "fm").unwrap();
    let stale_adapter = backend.adapter(CHIP).unwrap();
    registry.release(&mut first).unwrap();

    let mut second = registry.acquire(CHIP, "fm").unwrap();
    assert!(stale_adapter.report_version(VERSION), "callback still fires");

    assert!(configures(backend.journal()).is_empty());
    assert_eq!(registry.session(CHIP).unwrap().chip_version, None);

    registry.release(&mut second).unwrap();
}

#[test]
fn test_callback_after_registry_dropped_is_harmless() {
    let (_dir, backend, registry) = setup(AdapterStrategy::InitManager);

    let handle = registry.acquire(CHIP, "fm").unwrap();
    let adapter = backend.adapter(CHIP).unwrap();
    drop(handle);
    drop(registry);

    assert!(adapter.report_version(VERSION));
    assert!(configures(backend.journal()).is_empty());
}

// ============================================================================
// Configuration File Tests
// ============================================================================

#[test]
fn test_session_uses_config_file() {
    let (dir, backend, registry) = setup(AdapterStrategy::Direct);
    let path = dir.path().join(ccm_config::CONFIG_FILE_NAME);
    fs::write(&path, "[general]\naudio_interface = \"i2s\"\n").unwrap();

    let mut handle = registry.acquire(CHIP, "fm").unwrap();

    assert_eq!(registry.config_path(), path);
    assert_eq!(
        registry.session(CHIP).unwrap().config_source,
        Some(ConfigSource::File(path.clone()))
    );
    assert!(backend_loaded(&backend, &path));

    registry.release(&mut handle).unwrap();
}

fn backend_loaded(backend: &SimBackend, path: &std::path::Path) -> bool {
    backend.journal().events().contains(&SimEvent::ConfigLoad {
        path: path.to_path_buf(),
    })
}

#[test]
fn test_missing_config_file_uses_memory_profile() {
    let (_dir, _backend, registry) = setup(AdapterStrategy::Direct);

    let mut handle = registry.acquire(CHIP, "fm").unwrap();

    assert_eq!(
        registry.session(CHIP).unwrap().config_source,
        Some(ConfigSource::MemoryProfile)
    );

    registry.release(&mut handle).unwrap();
}

#[test]
fn test_subordinates_receive_session_config_and_handle() {
    let (dir, backend, registry) = setup(AdapterStrategy::Direct);
    let path = dir.path().join(ccm_config::CONFIG_FILE_NAME);
    fs::write(&path, "[general]\naudio_interface = \"pcm\"\n").unwrap();

    let mut handle = registry.acquire(CHIP, "fm").unwrap();

    let file = Some(ConfigSource::File(path));
    assert_eq!(
        create_sources(backend.journal()),
        vec![
            (Component::ConfigAbstraction, file.clone()),
            (Component::Adapter, None),
            (Component::AudioCoordinator, file),
        ]
    );

    let audio = backend.audio_coordinator(CHIP).unwrap();
    assert!(audio.uses_config_abstraction(&backend.config_abstraction(CHIP).unwrap()));
    assert!(audio.uses_config_abstraction(&registry.config_abstraction(&handle).unwrap()));

    // A rebuilt session wires its own config abstraction, not the old one.
    registry.release(&mut handle).unwrap();
    let old_cal = backend.config_abstraction(CHIP).unwrap();
    let mut handle = registry.acquire(CHIP, "bt").unwrap();
    let audio = backend.audio_coordinator(CHIP).unwrap();
    assert!(!audio.uses_config_abstraction(&old_cal));
    assert!(audio.uses_config_abstraction(&registry.config_abstraction(&handle).unwrap()));

    registry.release(&mut handle).unwrap();
}

#[test]
fn test_subordinates_receive_defaults_when_config_load_fails() {
    let (dir, backend, registry) = setup(AdapterStrategy::Direct);
    fs::write(
        dir.path().join(ccm_config::CONFIG_FILE_NAME),
        "[general]\naudio_interface = \"pcm\"\n",
    )
    .unwrap();
    backend.inject(FaultPoint::ConfigLoad);

    let mut handle = registry.acquire(CHIP, "fm").unwrap();

    let defaults = Some(ConfigSource::Default);
    assert_eq!(
        create_sources(backend.journal()),
        vec![
            (Component::ConfigAbstraction, defaults.clone()),
            (Component::Adapter, None),
            (Component::AudioCoordinator, defaults),
        ]
    );
    let audio = backend.audio_coordinator(CHIP).unwrap();
    assert!(audio.uses_config_abstraction(&registry.config_abstraction(&handle).unwrap()));

    registry.release(&mut handle).unwrap();
}

// ============================================================================
// Event Tests
// ============================================================================

#[test]
fn test_session_events_are_published_in_order() {
    let (_dir, backend, registry) = setup(AdapterStrategy::InitManager);
    let mut events = registry.subscribe();

    let mut h1 = registry.acquire(CHIP, "fm").unwrap();
    let mut h2 = registry.acquire(CHIP, "bt").unwrap();
    backend.power_up(CHIP, VERSION);
    registry.release(&mut h1).unwrap();
    registry.release(&mut h2).unwrap();

    let mut received = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => received.push(event),
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("unexpected receive error: {e}"),
        }
    }

    assert_eq!(
        received,
        vec![
            SessionEvent::Created {
                chip_id: CHIP,
                owner: OwnerContext::new("fm"),
                generation: 1,
            },
            SessionEvent::Acquired {
                chip_id: CHIP,
                owner: OwnerContext::new("fm"),
                owner_count: 1,
            },
            SessionEvent::Acquired {
                chip_id: CHIP,
                owner: OwnerContext::new("bt"),
                owner_count: 2,
            },
            SessionEvent::Configured {
                chip_id: CHIP,
                version: VERSION,
            },
            SessionEvent::Released {
                chip_id: CHIP,
                owner_count: 1,
            },
            SessionEvent::Released {
                chip_id: CHIP,
                owner_count: 0,
            },
            SessionEvent::Destroyed {
                chip_id: CHIP,
                generation: 1,
            },
        ]
    );
}
