use anyhow::{Context, Result};
use clap::Parser;
use content_migrate::logging::{init_logging, DEFAULT_FILTER};
use content_migrate::notifications::{
    Channel, NotificationClient, NotificationConfig, NotificationRequest,
};
use content_migrate::util::env;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "notify", version, about = "Send one notification through the notification service")]
struct Cli {
    /// Recipient address or id
    #[arg(long)]
    to: String,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    message: String,
    #[arg(long, value_enum, default_value_t = Channel::Email)]
    channel: Channel,
    /// Notification type (non-email channels)
    #[arg(long = "type")]
    notification_type: Option<String>,
    /// Template variables as a JSON object
    #[arg(long)]
    template_data: Option<String>,
    /// File path to attach (repeatable, email only)
    #[arg(long = "attachment")]
    attachments: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_logging(DEFAULT_FILTER, None)?;
    let cli = Cli::parse();

    let template_data = cli
        .template_data
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--template-data is not valid JSON")?;

    let request = match cli.channel {
        Channel::Email => NotificationRequest::email(
            &cli.to,
            cli.subject.as_deref().unwrap_or_default(),
            &cli.message,
            template_data,
            cli.attachments,
        ),
        channel => NotificationRequest::notification(
            channel,
            &cli.to,
            &cli.message,
            cli.subject.as_deref(),
            cli.notification_type.as_deref(),
            template_data,
        ),
    };

    let client = NotificationClient::new(NotificationConfig::from_env())?;
    let response = client.send(&request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
