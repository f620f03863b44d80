//! Wait Mechanisms Example
//!
//! Demonstrates the tarry wait helpers against an in-memory tree:
//! - PollConfig / WaitOptions (timeout, polling interval, YAML)
//! - wait_for (custom predicates)
//! - wait_for_element / wait_for_child (appearance)
//! - wait_for_element_to_disappear (removal and hiding)
//! - wait_for_alert (substring and pattern)
//! - spawn / on_complete (non-blocking form)
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=tarry=debug cargo run --example wait_mechanisms -p tarry
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tarry::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> TarryResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Tarry Wait Mechanisms Example ===\n");

    // Demo 1: configuration
    demo_config()?;

    // Demo 2: custom predicate
    demo_wait_for()?;

    // Demo 3: appearance
    demo_appearance()?;

    // Demo 4: disappearance
    demo_disappearance()?;

    // Demo 5: alerts
    demo_alerts()?;

    // Demo 6: timeouts
    demo_timeout();

    // Demo 7: non-blocking form
    demo_spawn()?;

    println!("\n=== Wait Mechanisms Example Complete ===");
    Ok(())
}

fn demo_config() -> TarryResult<()> {
    println!("--- Demo 1: PollConfig ---\n");

    let defaults = PollConfig::default();
    println!("Default PollConfig:");
    println!("  interval_ms: {}", defaults.interval_ms);
    println!(
        "  timeout_ms: {} (0 = inherit the client's ambient timeout)",
        defaults.timeout_ms
    );

    let from_yaml = PollConfig::from_yaml_str("interval_ms: 25\ntimeout_ms: 1500\n")?;
    println!("\nFrom YAML: {from_yaml:?}");

    let merged = from_yaml.merged(&WaitOptions::new().with_timeout(300));
    println!("Merged with per-call override: {merged:?}");

    match PollConfig::from_yaml_str("interval_ms: 0\n").and_then(|c| c.validate()) {
        Ok(()) => println!("unexpectedly valid"),
        Err(e) => println!("Rejected: {e}"),
    }
    println!();
    Ok(())
}

fn demo_wait_for() -> TarryResult<()> {
    println!("--- Demo 2: wait_for ---\n");

    let remote = Arc::new(MockRemote::new());
    let waiter = Waiter::new(remote);
    let counter = AtomicUsize::new(0);
    let result = waiter.wait_for(
        || counter.fetch_add(1, Ordering::SeqCst) >= 3,
        &WaitOptions::new().with_interval(10).with_timeout(1_000),
    )?;
    println!(
        "Counter predicate satisfied after {} tick(s) in {:?}",
        result.ticks, result.elapsed
    );
    println!();
    Ok(())
}

fn demo_appearance() -> TarryResult<()> {
    println!("--- Demo 3: Appearance ---\n");

    let remote = Arc::new(MockRemote::new());
    let waiter = Waiter::new(remote.clone());
    let options = WaitOptions::new().with_interval(20).with_timeout(2_000);

    remote.schedule(Duration::from_millis(150), Mutation::insert("#toast"));
    let result = waiter.wait_for_element("#toast", &options)?;
    println!("{} after {:?}", result.waited_for, result.elapsed);

    remote.apply(Mutation::insert("#menu"));
    remote.apply(Mutation::insert("#entry").under("#menu").hidden());
    remote.schedule(Duration::from_millis(100), Mutation::show("#entry"));
    let menu = remote
        .element("#menu")
        .ok_or_else(|| TarryError::config("menu not inserted"))?;
    let result = waiter.wait_for_child(menu, "#entry", &options)?;
    println!("{} after {:?}", result.waited_for, result.elapsed);
    println!();
    Ok(())
}

fn demo_disappearance() -> TarryResult<()> {
    println!("--- Demo 4: Disappearance ---\n");

    let remote = Arc::new(MockRemote::new());
    let waiter = Waiter::new(remote.clone());
    let options = WaitOptions::new().with_interval(20).with_timeout(2_000);

    remote.apply(Mutation::insert("#spinner"));
    remote.schedule(Duration::from_millis(120), Mutation::remove("#spinner"));
    let spinner = remote
        .element("#spinner")
        .ok_or_else(|| TarryError::config("spinner not inserted"))?;
    let result = waiter.wait_for_element_to_disappear(spinner, &options)?;
    println!("{} after {:?}", result.waited_for, result.elapsed);

    remote.apply(Mutation::insert("#overlay"));
    remote.schedule(Duration::from_millis(80), Mutation::hide("#overlay"));
    let result = waiter.wait_for_element_to_disappear("#overlay", &options)?;
    println!("{} after {:?}", result.waited_for, result.elapsed);
    println!();
    Ok(())
}

fn demo_alerts() -> TarryResult<()> {
    println!("--- Demo 5: Alerts ---\n");

    let remote = Arc::new(MockRemote::new());
    let waiter = Waiter::new(remote.clone());
    let options = WaitOptions::new().with_interval(20).with_timeout(2_000);

    remote.schedule(Duration::from_millis(60), Mutation::alert("Saved 3 contacts"));
    let result = waiter.wait_for_alert("Saved", &options)?;
    println!("{} after {:?}", result.waited_for, result.elapsed);

    let pattern = regex::Regex::new(r"Saved \d+ contacts")
        .map_err(|e| TarryError::config(e.to_string()))?;
    let result = waiter.wait_for_alert(pattern, &options)?;
    println!("{} after {:?}", result.waited_for, result.elapsed);
    println!();
    Ok(())
}

fn demo_timeout() {
    println!("--- Demo 6: Timeouts ---\n");

    let remote = Arc::new(MockRemote::with_ambient_timeout(Duration::from_millis(23)));
    let waiter = Waiter::new(remote.clone());
    match waiter.wait_for_element("#never", &WaitOptions::new().with_interval(10).with_timeout(100)) {
        Ok(_) => println!("unexpectedly found"),
        Err(e) => println!("{e}"),
    }
    println!(
        "Ambient timeout afterwards: {:?} (history {:?})",
        remote.ambient_timeout(),
        remote.ambient_history()
    );
    println!();
}

fn demo_spawn() -> TarryResult<()> {
    println!("--- Demo 7: Non-blocking form ---\n");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let remote = Arc::new(MockRemote::new());
        let waiter = Waiter::new(remote.clone());
        let options = WaitOptions::new().with_interval(20).with_timeout(2_000);

        remote.schedule(Duration::from_millis(100), Mutation::insert("#lazy"));
        let handle = waiter.spawn(Condition::appear("#lazy"), &options)?;
        println!("Spawned; finished yet: {}", handle.is_finished());
        let result = handle.await?;
        println!("{} after {:?}", result.waited_for, result.elapsed);

        let (tx, rx) = tokio::sync::oneshot::channel();
        remote.schedule(Duration::from_millis(50), Mutation::alert("lololol"));
        waiter.spawn_wait_for_alert("lol", &options, move |result| {
            let _ = tx.send(result);
        })?;
        match rx.await {
            Ok(Ok(result)) => println!("Callback: {} after {:?}", result.waited_for, result.elapsed),
            Ok(Err(e)) => println!("Callback error: {e}"),
            Err(_) => println!("Callback dropped"),
        }
        Ok(())
    })
}
