use std::{
    cell::Cell,
    collections::BTreeMap,
    rc::Rc,
    sync::Arc,
    time::Duration,
};

use httpmock::prelude::*;
use launch_core::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
use launch_dispatch::Dispatcher;
use launch_net::{HttpRetryConfig, HttpSender, RetryingHttpClient};
use launch_startup::{
    AppStartup, AttributionField, LaunchDecision, ReadyReason, ScriptStep, ScriptedSubsystem,
    ServicesConfig, StartupListener, StartupOrchestrator, StartupState, SubsystemEvent,
    SubsystemKind, SubsystemRegistry, SubsystemToggles,
};
use serde_json::json;

#[derive(Default)]
struct ReadyCounter {
    fired: Cell<usize>,
}

impl StartupListener for ReadyCounter {
    fn on_ready(&self, _reason: ReadyReason) {
        self.fired.set(self.fired.get() + 1);
    }
}

fn fast_http() -> Arc<dyn HttpSender> {
    Arc::new(
        RetryingHttpClient::new(HttpRetryConfig {
            max_attempts: 3,
            retry_delay_ms: 10,
            request_timeout_ms: 5_000,
        })
        .expect("http client"),
    )
}

fn silent_registry() -> (SubsystemRegistry, BTreeMap<SubsystemKind, Rc<ScriptedSubsystem>>) {
    let mut registry = SubsystemRegistry::new();
    let mut adapters = BTreeMap::new();
    for kind in SubsystemKind::ALL {
        let adapter = Rc::new(ScriptedSubsystem::silent(kind));
        registry.register(adapter.clone());
        adapters.insert(kind, adapter);
    }
    (registry, adapters)
}

fn scripted(kind: SubsystemKind, event: SubsystemEvent) -> Rc<ScriptedSubsystem> {
    Rc::new(ScriptedSubsystem::new(
        kind,
        vec![ScriptStep { delay_ms: 5, event }],
    ))
}

fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut output = Vec::new();
    for (index, first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(index);
        for mut tail in permutations(&rest) {
            tail.insert(0, *first);
            output.push(tail);
        }
    }
    output
}

fn success_event(kind: SubsystemKind) -> SubsystemEvent {
    match kind {
        SubsystemKind::InstallReferrer => SubsystemEvent::ReferrerParsed {
            params: BTreeMap::from([("utm_content".to_string(), "utm-1".to_string())]),
        },
        SubsystemKind::Push => SubsystemEvent::PushTokenReceived {
            token: "tok".to_string(),
        },
        SubsystemKind::FacebookDeepLink => SubsystemEvent::DeepLinkReceived {
            link: "myapp://promo".to_string(),
        },
        SubsystemKind::AppsFlyer => SubsystemEvent::CampaignReceived {
            campaign: "promo".to_string(),
            device_id: Some("dev-1".to_string()),
        },
        SubsystemKind::AdvertisingId => SubsystemEvent::AdvertisingIdReceived {
            id: "ad-1".to_string(),
        },
    }
}

fn toggles_for(kinds: &[SubsystemKind]) -> SubsystemToggles {
    SubsystemToggles {
        install_referrer: kinds.contains(&SubsystemKind::InstallReferrer),
        push: kinds.contains(&SubsystemKind::Push),
        facebook_deep_link: kinds.contains(&SubsystemKind::FacebookDeepLink),
        appsflyer: kinds.contains(&SubsystemKind::AppsFlyer),
        advertising_id: kinds.contains(&SubsystemKind::AdvertisingId),
    }
}

/// Every non-empty subset of the independent subsystems, plus AppsFlyer alone.
fn enabled_subsets() -> Vec<Vec<SubsystemKind>> {
    let independent = [
        SubsystemKind::InstallReferrer,
        SubsystemKind::Push,
        SubsystemKind::FacebookDeepLink,
        SubsystemKind::AdvertisingId,
    ];
    let mut subsets: Vec<Vec<SubsystemKind>> = (1..(1usize << independent.len()))
        .map(|mask| {
            independent
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, kind)| *kind)
                .collect()
        })
        .collect();
    subsets.push(vec![SubsystemKind::AppsFlyer]);
    subsets
}

async fn run_completion_order(
    toggles: &SubsystemToggles,
    kinds: &[SubsystemKind],
    order: &[usize],
) -> (ReadyReason, usize, bool, String) {
    let config = ServicesConfig {
        domain: "https://track.test".to_string(),
        subsystems: toggles.clone(),
        ..ServicesConfig::default()
    };
    let dispatcher = Dispatcher::new();
    let (registry, adapters) = silent_registry();
    let orchestrator = StartupOrchestrator::new(
        config,
        &registry,
        Arc::new(MemoryKeyValueStore::new()),
        fast_http(),
        &dispatcher,
    )
    .expect("orchestrator");
    let counter = Rc::new(ReadyCounter::default());
    orchestrator.set_listener(counter.clone());

    let reason = dispatcher
        .run_until(async {
            orchestrator.initialize_services();
            for index in order {
                let event = success_event(kinds[*index]);
                let adapter = adapters.get(&event.source()).expect("adapter");
                assert!(adapter.emit_now(event));
            }
            orchestrator.wait_ready().await
        })
        .await;
    // Let anything still queued land before counting ready signals.
    dispatcher.drain();

    let converged = orchestrator.completed() == orchestrator.expected()
        && orchestrator.expected() == toggles.expected_capabilities();
    (
        reason,
        counter.fired.get(),
        converged,
        orchestrator.build_tracking_url(),
    )
}

#[tokio::test(start_paused = true)]
async fn integration_every_subset_and_completion_order_fires_ready_once() {
    let subsets = enabled_subsets();
    assert_eq!(subsets.len(), 16);

    for kinds in subsets {
        let toggles = toggles_for(&kinds);
        let indices: Vec<usize> = (0..kinds.len()).collect();
        let mut urls = Vec::new();
        for order in permutations(&indices) {
            let (reason, fired, converged, url) =
                run_completion_order(&toggles, &kinds, &order).await;
            assert_eq!(reason, ReadyReason::ServicesReady, "{kinds:?} order {order:?}");
            assert_eq!(fired, 1, "{kinds:?} order {order:?}");
            assert!(converged, "{kinds:?} order {order:?}");
            urls.push(url);
        }
        urls.dedup();
        assert_eq!(urls.len(), 1, "{kinds:?} url depends on completion order: {urls:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn integration_all_subsystems_build_the_same_url_in_any_order() {
    let kinds = [
        SubsystemKind::InstallReferrer,
        SubsystemKind::Push,
        SubsystemKind::FacebookDeepLink,
        SubsystemKind::AdvertisingId,
    ];
    let toggles = toggles_for(&kinds);
    let orders = permutations(&[0, 1, 2, 3]);
    assert_eq!(orders.len(), 24);
    for order in orders {
        let (_, fired, _, url) = run_completion_order(&toggles, &kinds, &order).await;
        assert_eq!(fired, 1, "order {order:?}");
        assert_eq!(
            url,
            "https://track.test?sub_id_1=promo&ad_id=ad-1&push_token=tok&naming=utm-1",
            "order {order:?}"
        );
    }
}

#[tokio::test]
async fn integration_full_launch_decodes_referrer_and_persists_url() {
    let server = MockServer::start();
    let credentials = server.mock(|when, then| {
        when.method(GET).path("/fb-credentials");
        then.status(200)
            .json_body(json!({"fid": "app-id", "ftok": "client-token"}));
    });
    let decode = server.mock(|when, then| {
        when.method(POST).path("/decode").body("enc");
        then.status(200).json_body(json!({
            "status": "ok",
            "data": {"ad_id": 42, "campaign_name": "spring", "campaign_group_name": "grp"}
        }));
    });

    let tempdir = tempfile::tempdir().expect("tempdir");
    let state_path = tempdir.path().join("state").join("launch.json");
    let config = ServicesConfig {
        domain: "https://track.test".to_string(),
        subsystems: SubsystemToggles {
            install_referrer: true,
            facebook_deep_link: true,
            ..SubsystemToggles::default()
        },
        decode_install_referrer: true,
        install_referrer_decode_url: server.url("/decode"),
        facebook_credentials_url: server.url("/fb-credentials"),
        ..ServicesConfig::default()
    };
    let expected_url = "https://track.test?sub_id_1=spring-sale&campaign_group_name_ref=grp&ad_id_ref=42&campaign_name_ref=spring";

    let facebook = scripted(
        SubsystemKind::FacebookDeepLink,
        SubsystemEvent::DeepLinkReceived {
            link: "myapp://spring-sale".to_string(),
        },
    );
    let referrer = scripted(
        SubsystemKind::InstallReferrer,
        SubsystemEvent::ReferrerParsed {
            params: BTreeMap::from([("utm_content".to_string(), "enc".to_string())]),
        },
    );
    let registry = SubsystemRegistry::new()
        .with(facebook.clone())
        .with(referrer.clone());

    {
        let dispatcher = Dispatcher::new();
        let store: Arc<dyn KeyValueStore> =
            Arc::new(FileKeyValueStore::open(&state_path).expect("state store"));
        let orchestrator = StartupOrchestrator::new(
            config.clone(),
            &registry,
            Arc::clone(&store),
            fast_http(),
            &dispatcher,
        )
        .expect("orchestrator");
        let app = AppStartup::new(orchestrator, None, store);

        let decision = dispatcher.run_until(app.launch()).await.expect("launch");
        assert_eq!(
            decision,
            LaunchDecision::OpenWeb {
                url: expected_url.to_string()
            }
        );
        let log = app.orchestrator().state_log();
        assert!(log.contains(StartupState::FacebookCredentialsRequest));
        assert!(log.contains(StartupState::InstallReferrerSuccess));
        assert_eq!(log.current(), StartupState::OpenDestination);
        assert_eq!(
            facebook.credentials().and_then(|credentials| credentials.fid),
            Some("app-id".to_string())
        );
    }

    credentials.assert_hits(1);
    decode.assert_hits(1);
    let persisted = FileKeyValueStore::open(&state_path).expect("reopen state");
    assert_eq!(persisted.load_string("url", ""), expected_url);
    assert_eq!(persisted.load_string("open_first_time", ""), "false");

    let dispatcher = Dispatcher::new();
    let store: Arc<dyn KeyValueStore> = Arc::new(persisted);
    let orchestrator =
        StartupOrchestrator::new(config, &registry, Arc::clone(&store), fast_http(), &dispatcher)
            .expect("orchestrator");
    let app = AppStartup::new(orchestrator, None, store);
    let decision = dispatcher.run_until(app.launch()).await.expect("second launch");
    assert_eq!(
        decision,
        LaunchDecision::OpenWeb {
            url: expected_url.to_string()
        }
    );
    assert!(app
        .orchestrator()
        .state_log()
        .contains(StartupState::LoadFromSave));
    credentials.assert_hits(1);
    decode.assert_hits(1);
}

#[tokio::test]
async fn integration_failed_referrer_decode_retries_then_falls_back_to_naming() {
    let server = MockServer::start();
    let decode = server.mock(|when, then| {
        when.method(POST).path("/decode");
        then.status(500).body("unavailable");
    });
    let config = ServicesConfig {
        domain: "https://track.test".to_string(),
        subsystems: SubsystemToggles {
            install_referrer: true,
            ..SubsystemToggles::default()
        },
        decode_install_referrer: true,
        install_referrer_decode_url: server.url("/decode"),
        ..ServicesConfig::default()
    };
    let registry = SubsystemRegistry::new().with(scripted(
        SubsystemKind::InstallReferrer,
        SubsystemEvent::ReferrerParsed {
            params: BTreeMap::from([("utm_content".to_string(), "enc value".to_string())]),
        },
    ));
    let dispatcher = Dispatcher::new();
    let orchestrator = StartupOrchestrator::new(
        config,
        &registry,
        Arc::new(MemoryKeyValueStore::new()),
        fast_http(),
        &dispatcher,
    )
    .expect("orchestrator");

    let reason = dispatcher
        .run_until(async {
            orchestrator.initialize_services();
            orchestrator.wait_ready().await
        })
        .await;

    assert_eq!(reason, ReadyReason::ServicesReady);
    decode.assert_hits(3);
    let record = orchestrator.record();
    assert!(record
        .get(AttributionField::ReferrerError)
        .is_some_and(|error| error.contains("after 3 attempts")));
    assert_eq!(
        orchestrator.build_tracking_url(),
        "https://track.test?naming=enc+value"
    );
}

#[tokio::test(start_paused = true)]
async fn integration_silent_subsystems_time_out_and_late_results_still_land() {
    let config = ServicesConfig {
        domain: "https://track.test".to_string(),
        startup_timeout_ms: 3_000,
        subsystems: SubsystemToggles {
            push: true,
            advertising_id: true,
            ..SubsystemToggles::default()
        },
        ..ServicesConfig::default()
    };
    let dispatcher = Dispatcher::new();
    let (registry, adapters) = silent_registry();
    let orchestrator = StartupOrchestrator::new(
        config,
        &registry,
        Arc::new(MemoryKeyValueStore::new()),
        fast_http(),
        &dispatcher,
    )
    .expect("orchestrator");
    let counter = Rc::new(ReadyCounter::default());
    orchestrator.set_listener(counter.clone());

    let started = tokio::time::Instant::now();
    dispatcher
        .run_until(async {
            orchestrator.initialize_services();
            assert_eq!(orchestrator.wait_ready().await, ReadyReason::TimedOut);
            assert!(started.elapsed() >= Duration::from_millis(3_000));
            let push = adapters.get(&SubsystemKind::Push).expect("push adapter");
            assert!(push.emit_now(SubsystemEvent::PushTokenReceived {
                token: "late".to_string(),
            }));
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await;

    assert_eq!(counter.fired.get(), 1);
    assert_eq!(
        orchestrator.record().get(AttributionField::PushToken),
        Some("late")
    );
    let report = orchestrator.diagnostics_report();
    assert!(report.contains("Services Timeout: true"));
    assert!(report.contains("Time Timeout: 3.0s"));
}
