//! Outbound notifications. Delivery is fire-and-forget: a failed send is
//! logged and never reaches the request that triggered it.

use std::sync::Arc;

use async_trait::async_trait;

/// Everything needed to tell someone they were invited to a team.
#[derive(Debug, Clone)]
pub struct InviteNotice {
    pub email: String,
    pub team_name: String,
    pub token: String,
    pub invited_by: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_team_invite(&self, notice: &InviteNotice) -> anyhow::Result<()>;
}

/// Default notifier: logs the invite link instead of sending mail.
pub struct LogNotifier {
    app_url: String,
    from: String,
}

impl LogNotifier {
    pub fn new(app_url: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
            from: from.into(),
        }
    }

    pub fn invite_link(&self, token: &str) -> String {
        format!("{}/invite/{}", self.app_url.trim_end_matches('/'), token)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_team_invite(&self, notice: &InviteNotice) -> anyhow::Result<()> {
        tracing::info!(
            to = %notice.email,
            from = %self.from,
            team = %notice.team_name,
            invited_by = %notice.invited_by,
            link = %self.invite_link(&notice.token),
            "Team invite"
        );
        Ok(())
    }
}

/// Deliver on a background task. Errors are logged with `warn!`.
pub fn dispatch_invite(notifier: Arc<dyn Notifier>, notice: InviteNotice) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.send_team_invite(&notice).await {
            tracing::warn!(to = %notice.email, error = %e, "Failed to send team invite");
        }
    })
}
