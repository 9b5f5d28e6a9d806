use chrono::{DateTime, Utc};

use super::Alert;
use crate::models::{HealthStatus, ProxyResource};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Escape the three characters Telegram's HTML mode cares about.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn username(resource: &ProxyResource) -> &str {
    resource.address.credentials.as_ref().map(|c| c.username.as_str()).unwrap_or("")
}

pub fn alert(resource: &ProxyResource, alert: &Alert, now: DateTime<Utc>) -> String {
    let title = match alert {
        Alert::Down { .. } => "🔴 <b>Proxy Down</b>",
        Alert::Recovered => "🟢 <b>Proxy Recovered</b>",
        Alert::IpChanged { .. } => "🔄 <b>IP Changed</b>",
        Alert::IpStuck { .. } => "⚠️ <b>IP Stuck</b>",
        Alert::LowSpeed { .. } => "🐌 <b>Low Speed Detected</b>",
    };

    let mut lines = vec![
        title.to_string(),
        String::new(),
        format!("<b>Name:</b> {}", escape_html(&resource.name)),
        format!("<b>Proxy:</b> {}:{}", escape_html(&resource.address.host), resource.address.port),
        format!("<b>Username:</b> {}", escape_html(username(resource))),
    ];

    match alert {
        Alert::Down { error } => {
            lines.push(format!("<b>Failures:</b> {}", resource.failures));
            lines.push(format!("<b>Error:</b> {}", escape_html(error)));
        }
        Alert::Recovered => lines.push(format!("<b>Latency:</b> {} ms", resource.latency_ms)),
        Alert::IpChanged { previous_ip, new_ip } => {
            lines.push(format!("<b>Old IP:</b> {}", escape_html(previous_ip)));
            lines.push(format!("<b>New IP:</b> {}", escape_html(new_ip)));
            lines.extend(origin(resource));
        }
        Alert::IpStuck { ip, hours } => {
            lines.push(format!("<b>Stuck IP:</b> {}", escape_html(ip)));
            lines.push(format!("<b>Duration:</b> {hours} hours"));
            lines.extend(origin(resource));
        }
        Alert::LowSpeed { download_mbps, upload_mbps, threshold_mbps } => {
            lines.push(format!("<b>Download:</b> {download_mbps:.1} Mbps"));
            lines.push(format!("<b>Upload:</b> {upload_mbps:.1} Mbps"));
            lines.push(format!("<b>Threshold:</b> {threshold_mbps:.1} Mbps"));
        }
    }

    lines.push(format!("<b>Time:</b> {}", now.format(TIME_FORMAT)));
    lines.join("\n")
}

fn origin(resource: &ProxyResource) -> [String; 2] {
    [
        format!("<b>Country:</b> {}", escape_html(&resource.egress_country)),
        format!("<b>Operator:</b> {}", escape_html(&resource.operator)),
    ]
}

pub fn summary(resources: &[ProxyResource], now: DateTime<Utc>) -> String {
    let total = resources.len();
    let alive = resources.iter().filter(|r| r.status == HealthStatus::Alive).count();
    let dead = total - alive;

    let measured: Vec<f64> =
        resources.iter().map(|r| r.download_mbps).filter(|speed| *speed > 0.0).collect();
    let avg_speed =
        if measured.is_empty() { 0.0 } else { measured.iter().sum::<f64>() / measured.len() as f64 };

    let percent = |n: usize| if total == 0 { 0.0 } else { n as f64 / total as f64 * 100.0 };

    format!(
        "📊 <b>Daily Proxy Summary</b>\n\n\
         <b>Total Proxies:</b> {total}\n\
         <b>Alive:</b> {alive} ({:.1}%)\n\
         <b>Dead:</b> {dead} ({:.1}%)\n\
         <b>Avg Speed:</b> {avg_speed:.1} Mbps\n\
         <b>Date:</b> {}",
        percent(alive),
        percent(dead),
        now.format("%Y-%m-%d"),
    )
}

pub fn test_message(now: DateTime<Utc>) -> String {
    format!(
        "✅ <b>Test Notification</b>\n\nNotifications are configured correctly.\n<b>Time:</b> {}",
        now.format(TIME_FORMAT)
    )
}
