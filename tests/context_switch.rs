//! Context switch protocol against the in-memory driver

use rfverify::switch::{verify_outbound_link, with_new_context};
use rfverify::{
    ContextId, ContextRegistry, Driver, Error, MemoryDriver, Navigation, SwitchOptions, VerificationOutcome, Verifier,
    VerifyConfig,
};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SHOP: &str = "https://www.saucedemo.test/inventory.html";

fn options() -> SwitchOptions {
    SwitchOptions {
        timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        restore_same_context: true,
    }
}

fn setup() -> (MemoryDriver, ContextId, ContextRegistry) {
    let driver = MemoryDriver::new(SHOP).expect("driver");
    let origin = driver.current_context().expect("origin");
    (driver, origin, ContextRegistry::new())
}

fn open_example(d: &MemoryDriver) -> rfverify::Result<()> {
    d.open_context("https://example.com/x").map(|_| ())
}

fn assert_restored(driver: &MemoryDriver, origin: &ContextId) {
    assert_eq!(&driver.current_context().unwrap(), origin);
    let open = driver.list_contexts().unwrap();
    assert_eq!(open.len(), 1, "leaked contexts: {:?}", open);
    assert!(open.contains(origin));
}

#[test]
fn outbound_link_end_to_end() {
    let (driver, origin, mut registry) = setup();

    let result = with_new_context(
        &driver,
        &mut registry,
        &origin,
        open_example,
        |d, ctx| {
            assert_eq!(&d.current_context()?, ctx);
            let location = d.current_location()?;
            Ok(if location.as_str().contains("example.com") {
                VerificationOutcome::pass(format!("opened {}", location))
            } else {
                VerificationOutcome::fail(format!("opened {}", location))
            })
        },
        &options(),
    )
    .unwrap();

    assert!(result.success());
    assert!(matches!(result.navigation, Navigation::NewContext { ref extra, .. } if extra.is_empty()));
    assert_restored(&driver, &origin);
    assert_eq!(registry.current(), Some(&origin));
}

#[test]
fn failed_verification_is_returned_after_teardown() {
    let (driver, origin, mut registry) = setup();

    let result = with_new_context(
        &driver,
        &mut registry,
        &origin,
        open_example,
        |_, _| Ok(VerificationOutcome::fail("expected saucelabs.com")),
        &options(),
    )
    .unwrap();

    assert!(!result.success());
    assert_eq!(result.outcome.diagnostic, "expected saucelabs.com");
    assert_restored(&driver, &origin);
}

#[test]
fn verify_error_still_restores_origin() {
    let (driver, origin, mut registry) = setup();

    let err = with_new_context(
        &driver,
        &mut registry,
        &origin,
        open_example,
        |_, _| Err(Error::NotFound("h1.title".into())),
        &options(),
    )
    .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_restored(&driver, &origin);
}

#[test]
fn verify_panic_still_restores_origin() {
    let (driver, origin, mut registry) = setup();

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        with_new_context(
            &driver,
            &mut registry,
            &origin,
            open_example,
            |d, _| {
                let location = d.current_location()?;
                assert!(location.as_str().contains("saucelabs.com"), "wrong site: {}", location);
                Ok(VerificationOutcome::pass("unreachable"))
            },
            &options(),
        )
    }));

    assert!(caught.is_err(), "assertion panic should propagate");
    assert_restored(&driver, &origin);
}

#[test]
fn nothing_opened_is_a_switch_timeout() {
    let (driver, origin, mut registry) = setup();

    let err = with_new_context(
        &driver,
        &mut registry,
        &origin,
        |_| Ok(()),
        |_, _| Ok(VerificationOutcome::pass("unused")),
        &options(),
    )
    .unwrap_err();

    match err {
        Error::ContextSwitchTimeout { origin: o, contexts, .. } => {
            assert_eq!(o, origin);
            assert_eq!(contexts, vec![origin.clone()]);
        }
        other => panic!("expected ContextSwitchTimeout, got {:?}", other),
    }
    assert_restored(&driver, &origin);
}

#[test]
fn same_tab_navigation_is_verified_in_place_and_restored() {
    let (driver, origin, mut registry) = setup();

    let result = with_new_context(
        &driver,
        &mut registry,
        &origin,
        |d| d.navigate("https://saucelabs.test/"),
        |d, ctx| {
            assert_eq!(ctx, &d.current_context()?);
            Ok(VerificationOutcome::pass(d.current_location()?.to_string()))
        },
        &options(),
    )
    .unwrap();

    assert!(result.success());
    match &result.navigation {
        Navigation::SameContext { from, to } => {
            assert_eq!(from.as_str(), SHOP);
            assert_eq!(to.host_str(), Some("saucelabs.test"));
        }
        other => panic!("expected same-context navigation, got {:?}", other),
    }
    assert_eq!(driver.current_location().unwrap().as_str(), SHOP);
    assert_restored(&driver, &origin);
}

#[test]
fn same_tab_navigation_can_be_left_in_place() {
    let (driver, origin, mut registry) = setup();
    let opts = SwitchOptions {
        restore_same_context: false,
        ..options()
    };

    with_new_context(
        &driver,
        &mut registry,
        &origin,
        |d| d.navigate("https://saucelabs.test/"),
        |_, _| Ok(VerificationOutcome::pass("in place")),
        &opts,
    )
    .unwrap();

    assert_eq!(driver.current_location().unwrap().host_str(), Some("saucelabs.test"));
}

#[test]
fn several_new_contexts_pick_lowest_id_and_close_all() {
    let (driver, origin, mut registry) = setup();

    let result = with_new_context(
        &driver,
        &mut registry,
        &origin,
        |d| {
            d.open_context("https://example.com/first")?;
            d.open_context("https://example.com/popup")?;
            Ok(())
        },
        |d, _| Ok(VerificationOutcome::pass(d.current_location()?.path().to_string())),
        &options(),
    )
    .unwrap();

    assert_eq!(result.outcome.diagnostic, "/first");
    match &result.navigation {
        Navigation::NewContext { id, extra } => {
            assert_eq!(id.as_str(), "ctx-0001");
            assert_eq!(extra, &vec![ContextId::from("ctx-0002")]);
        }
        other => panic!("expected new context, got {:?}", other),
    }
    assert_eq!(driver.closed_contexts().unwrap().len(), 2);
    assert_restored(&driver, &origin);
}

#[test]
fn context_opened_after_a_delay_is_found() {
    let driver = Arc::new(MemoryDriver::new(SHOP).unwrap());
    let origin = driver.current_context().unwrap();
    let mut registry = ContextRegistry::new();

    let result = with_new_context(
        driver.as_ref(),
        &mut registry,
        &origin,
        |_| {
            let d = Arc::clone(&driver);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                d.open_context("https://example.com/late").unwrap();
            });
            Ok(())
        },
        |d, _| Ok(VerificationOutcome::pass(d.current_location()?.to_string())),
        &options(),
    )
    .unwrap();

    assert!(result.success());
    assert_restored(&driver, &origin);
}

#[test]
fn teardown_failure_after_success_is_reported() {
    let (driver, origin, mut registry) = setup();

    let err = with_new_context(
        &driver,
        &mut registry,
        &origin,
        open_example,
        |d, _| {
            d.set_close_failure(true)?;
            Ok(VerificationOutcome::pass("fine"))
        },
        &options(),
    )
    .unwrap_err();

    assert!(matches!(err, Error::DriverError(_)));
    // Switching back is still attempted when closing fails.
    assert_eq!(driver.current_context().unwrap(), origin);
}

#[test]
fn outbound_link_helper_matches_case_insensitively() {
    let (driver, origin, mut registry) = setup();

    let result = verify_outbound_link(
        &driver,
        &mut registry,
        &origin,
        |d: &MemoryDriver| d.open_context("https://SauceLabs.test/about").map(|_| ()),
        "saucelabs",
        &options(),
    )
    .unwrap();
    assert!(result.success(), "{}", result.outcome.diagnostic);
    assert_restored(&driver, &origin);

    let wrong = verify_outbound_link(&driver, &mut registry, &origin, open_example, "saucelabs", &options()).unwrap();
    assert!(!wrong.success());
    assert!(wrong.outcome.diagnostic.contains("does not contain 'saucelabs'"));
    assert_restored(&driver, &origin);
}

#[test]
fn verifier_facade_runs_the_protocol_with_config() {
    let driver = MemoryDriver::new(SHOP).unwrap();
    let config = VerifyConfig {
        timeout_ms: 200,
        poll_interval_ms: 10,
        ..Default::default()
    };
    let mut verifier = Verifier::new(driver, config).unwrap();

    let result = verifier
        .verify_outbound_link(|d: &MemoryDriver| d.open_context("https://example.com/x").map(|_| ()), "example.com")
        .unwrap();
    assert!(result.success());
    let origin = verifier.driver().current_context().unwrap();
    assert_eq!(verifier.current_context(), Some(&origin));

    let err = verifier
        .with_new_context_from(
            &origin,
            |_| Ok(()),
            |_, _| Ok(VerificationOutcome::pass("unused")),
            Duration::from_millis(50),
        )
        .unwrap_err();
    assert!(matches!(err, Error::ContextSwitchTimeout { timeout_ms: 50, .. }));

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["navigation"]["kind"], "new_context");
    assert_eq!(json["outcome"]["success"], true);
}

#[test]
fn trigger_panic_cleans_up_before_unwinding() {
    let (driver, origin, mut registry) = setup();

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        with_new_context(
            &driver,
            &mut registry,
            &origin,
            |d: &MemoryDriver| {
                d.open_context("https://example.com/x")?;
                panic!("click handler blew up");
            },
            |_, _| Ok(VerificationOutcome::pass("unused")),
            &options(),
        )
    }));

    assert!(caught.is_err());
    assert_restored(&driver, &origin);
    assert_eq!(driver.closed_contexts().unwrap().len(), 1);
}

#[test]
fn driver_failure_while_waiting_is_fatal() {
    let (driver, origin, mut registry) = setup();

    let start = Instant::now();
    let err = with_new_context(
        &driver,
        &mut registry,
        &origin,
        |d: &MemoryDriver| d.set_list_failure(true),
        |_, _| Ok(VerificationOutcome::pass("unused")),
        &options(),
    )
    .unwrap_err();

    match err {
        Error::FatalPredicate(inner) => assert!(matches!(*inner, Error::DriverError(_))),
        other => panic!("expected fatal predicate, got {:?}", other),
    }
    assert!(start.elapsed() < options().timeout);
    assert_eq!(driver.current_context().unwrap(), origin);

    driver.set_list_failure(false).unwrap();
    assert_restored(&driver, &origin);
}

#[test]
fn failed_trigger_with_unlistable_contexts_returns_trigger_error() {
    let (driver, origin, mut registry) = setup();

    let err = with_new_context(
        &driver,
        &mut registry,
        &origin,
        |d: &MemoryDriver| {
            d.set_list_failure(true)?;
            Err(Error::Other("click intercepted".into()))
        },
        |_, _| Ok(VerificationOutcome::pass("unused")),
        &options(),
    )
    .unwrap_err();

    assert!(matches!(err, Error::Other(ref m) if m == "click intercepted"));
    assert_eq!(driver.current_context().unwrap(), origin);
}

/// Opens a context exactly between the final poll of the new-context wait and
/// the listing that follows it: the first listing at or past the deadline
/// still shows nothing new, the next one does.
struct DeadlineOpener {
    inner: MemoryDriver,
    deadline: Mutex<Option<Instant>>,
    stage: AtomicUsize,
}

impl DeadlineOpener {
    fn new() -> Self {
        Self {
            inner: MemoryDriver::new(SHOP).unwrap(),
            deadline: Mutex::new(None),
            stage: AtomicUsize::new(0),
        }
    }

    fn arm(&self, after: Duration) -> rfverify::Result<()> {
        *self.deadline.lock().unwrap() = Some(Instant::now() + after);
        Ok(())
    }
}

impl Driver for DeadlineOpener {
    fn list_contexts(&self) -> rfverify::Result<BTreeSet<ContextId>> {
        let due = self.deadline.lock().unwrap().map_or(false, |d| Instant::now() >= d);
        if due {
            match self.stage.load(Ordering::SeqCst) {
                0 => self.stage.store(1, Ordering::SeqCst),
                1 => {
                    self.inner.open_context("https://example.com/late")?;
                    self.stage.store(2, Ordering::SeqCst);
                }
                _ => {}
            }
        }
        self.inner.list_contexts()
    }

    fn current_context(&self) -> rfverify::Result<ContextId> {
        self.inner.current_context()
    }

    fn switch_to(&self, id: &ContextId) -> rfverify::Result<()> {
        self.inner.switch_to(id)
    }

    fn close(&self, id: &ContextId) -> rfverify::Result<()> {
        self.inner.close(id)
    }

    fn current_location(&self) -> rfverify::Result<url::Url> {
        self.inner.current_location()
    }

    fn navigate_back(&self) -> rfverify::Result<()> {
        self.inner.navigate_back()
    }
}

#[test]
fn context_opened_at_the_deadline_is_verified_and_closed() {
    let driver = DeadlineOpener::new();
    let origin = driver.current_context().unwrap();
    let mut registry = ContextRegistry::new();
    let opts = SwitchOptions {
        timeout: Duration::from_millis(100),
        ..options()
    };

    let result = with_new_context(
        &driver,
        &mut registry,
        &origin,
        |d: &DeadlineOpener| d.arm(opts.timeout),
        |d, _| Ok(VerificationOutcome::pass(d.current_location()?.path().to_string())),
        &opts,
    )
    .unwrap();

    assert!(result.success());
    assert_eq!(result.outcome.diagnostic, "/late");
    assert!(matches!(result.navigation, Navigation::NewContext { .. }));
    assert_restored(&driver.inner, &origin);
}
