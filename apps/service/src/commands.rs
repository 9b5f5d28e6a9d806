//! One-shot subcommands. Everything except `run` and `show-config` lands here.

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use proxyup::monitoring::{BatchRunner, FailureStats};
use proxyup::{CheckKind, ProxyAddress, ProxyResource, ResourceStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cli::Commands;
use crate::orchestrator::Components;

pub async fn execute(command: Commands, components: &Components) -> Result<()> {
    match command {
        Commands::Check { kind } => check(components, kind).await,
        Commands::Verify { id } => verify(components, id).await,
        Commands::Add { host, port, username, password, name, contact, tag } => {
            let address = proxy_address(host, port, username, password)?;
            let mut resource = ProxyResource::new(address).with_name(name);
            resource.contact = contact;
            resource.tag = tag;
            add(components, resource).await
        }
        Commands::Remove { id } => remove(components, id).await,
        Commands::List => list(components).await,
        Commands::Stats { id, days, json } => stats(components, id, days, json).await,
        Commands::Summary => {
            let resources = components.store.list_resources().await?;
            components.notifier.send_summary(&resources).await;
            println!("Summary sent for {} proxies", resources.len());
            Ok(())
        }
        Commands::NotifyTest => {
            components.notifier.send_test().await.context("test notification failed")?;
            println!("Test notification sent");
            Ok(())
        }
        Commands::Run | Commands::ShowConfig => bail!("not a one-shot command"),
    }
}

async fn check(components: &Components, kind: CheckKind) -> Result<()> {
    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let report = components.executor.run_batch(kind, token).await?;
    println!(
        "{kind} batch: {} of {} proxies checked, {} failed{}",
        report.processed,
        report.total,
        report.failed,
        if report.cancelled { " (interrupted)" } else { "" },
    );
    Ok(())
}

async fn verify(components: &Components, id: Uuid) -> Result<()> {
    let Some(resource) = components.executor.verify(id).await? else {
        bail!("no proxy with id {id}");
    };
    print_resource(&resource);
    Ok(())
}

fn proxy_address(
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
) -> Result<ProxyAddress> {
    let address = ProxyAddress::new(host, port);
    match (username, password) {
        (Some(username), Some(password)) => Ok(address.with_credentials(username, password)),
        (None, None) => Ok(address),
        _ => bail!("--username and --password must be given together"),
    }
}

async fn add(components: &Components, resource: ProxyResource) -> Result<()> {
    resource.address.validate()?;
    components.store.create_resource(&resource).await?;
    println!("Added {} as {}", resource.address, resource.id);
    Ok(())
}

async fn remove(components: &Components, id: Uuid) -> Result<()> {
    if !components.store.delete_resource(id).await? {
        bail!("no proxy with id {id}");
    }
    println!("Removed {id}");
    Ok(())
}

async fn list(components: &Components) -> Result<()> {
    let resources = components.store.list_resources().await?;
    if resources.is_empty() {
        println!("No proxies registered");
        return Ok(());
    }
    for resource in &resources {
        print_resource(resource);
    }
    Ok(())
}

async fn stats(components: &Components, id: Uuid, days: u32, json: bool) -> Result<()> {
    let store = &components.store;
    let Some(resource) = store.get_resource(id).await? else {
        bail!("no proxy with id {id}");
    };

    let now = Utc::now();
    let records = store.failure_records(id, now - Duration::days(i64::from(days.max(1)))).await?;
    let stats = FailureStats::compute(&records, days, now);
    let ip_history = store.ip_observations(id).await?;
    let speed_history = store.speed_samples(id).await?;

    if json {
        let out = serde_json::json!({
            "id": resource.id,
            "failures": stats,
            "ip_history": ip_history,
            "speed_history": speed_history,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_resource(&resource);
    println!("  Failures (last {} days): {}", stats.days, stats.total);
    println!("    connectivity: {}", stats.connectivity);
    println!("    throughput:   {}", stats.throughput);
    println!("    egress ip:    {}", stats.egress_ip);
    println!("    per day:      {:.2}", stats.failures_per_day);
    if let Some(last) = stats.last_failure {
        println!("    last:         {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    println!("  IP history ({} entries)", ip_history.len());
    for entry in ip_history.iter().rev().take(10) {
        println!(
            "    {}  {} -> {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.previous_ip.as_deref().unwrap_or("-"),
            entry.ip,
            if entry.stuck { "  (stuck)" } else { "" },
        );
    }

    println!("  Speed history ({} samples)", speed_history.len());
    for sample in speed_history.iter().rev().take(10) {
        println!(
            "    {}  down {:.2} Mbps  up {:.2} Mbps",
            sample.timestamp.format("%Y-%m-%d %H:%M"),
            sample.download_mbps,
            sample.upload_mbps,
        );
    }
    Ok(())
}

fn print_resource(resource: &ProxyResource) {
    println!("{}  {}", resource.id, resource.label());
    println!("  Proxy:     {}", resource.address);
    println!("  Status:    {} ({} consecutive failures)", resource.status, resource.failures);
    println!("  Latency:   {} ms", resource.latency_ms);
    println!("  Uptime:    {} min", resource.uptime_minutes);
    println!("  Speed:     down {:.2} / up {:.2} Mbps", resource.download_mbps, resource.upload_mbps);
    println!(
        "  Egress:    {} {} {}{}",
        resource.egress_ip.as_deref().unwrap_or("-"),
        resource.egress_country,
        resource.operator,
        if resource.stuck { " (stuck)" } else { "" },
    );
    if let Some(checked) = resource.last_check {
        println!("  Last OK:   {}", checked.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_a_credential_pair_is_rejected() {
        let err = proxy_address("10.0.0.1".into(), 3128, Some("alice".into()), None).unwrap_err();
        assert!(err.to_string().contains("together"));
        assert!(proxy_address("10.0.0.1".into(), 3128, None, Some("pw".into())).is_err());
    }

    #[test]
    fn full_or_empty_credentials_are_accepted() {
        let plain = proxy_address("10.0.0.1".into(), 3128, None, None).unwrap();
        assert_eq!(plain, ProxyAddress::new("10.0.0.1", 3128));

        let authed =
            proxy_address("10.0.0.1".into(), 3128, Some("alice".into()), Some("pw".into())).unwrap();
        assert_eq!(authed, ProxyAddress::new("10.0.0.1", 3128).with_credentials("alice", "pw"));
    }
}
