//! Job orchestration — one mention event becomes one scheduled agent job.
//!
//! The dispatcher derives the thread id, builds the lifecycle closure
//! (in-progress marker → fetch thread → invoke agent → report result),
//! submits it to the scheduler, and translates admission rejections and
//! job failures into notices on the originating thread.

use std::sync::Arc;

use crate::agent::AgentRunner;
use crate::credentials::CredentialSync;
use crate::error::Error;
use crate::scheduler::{AgentScheduler, SubmitOutcome};
use crate::slack::{self, MentionEvent, SlackClient};

const IN_PROGRESS_REACTION: &str = "hourglass_flowing_sand";
const SUCCESS_REACTION: &str = "white_check_mark";
const EMPTY_REACTION: &str = "warning";
const FAILURE_REACTION: &str = "x";

const BUSY_NOTICE: &str = "I'm still working on your previous request in this thread.";
const OVERLOADED_NOTICE: &str =
    "I'm handling too many requests right now. Please try again in a moment.";
const EMPTY_RESULT_NOTICE: &str = "I wasn't able to produce a response.";

pub struct Dispatcher {
    slack: Arc<SlackClient>,
    agent: Arc<dyn AgentRunner>,
    scheduler: AgentScheduler,
    credentials: Arc<CredentialSync>,
    log_channel: Option<String>,
}

impl Dispatcher {
    pub fn new(
        slack: Arc<SlackClient>,
        agent: Arc<dyn AgentRunner>,
        scheduler: AgentScheduler,
        credentials: Arc<CredentialSync>,
        log_channel: Option<String>,
    ) -> Self {
        Self {
            slack,
            agent,
            scheduler,
            credentials,
            log_channel,
        }
    }

    /// Handle one `app_mention` trigger.
    pub async fn handle_mention(&self, event: MentionEvent) {
        let thread_id = event.thread_id().to_string();
        let text = slack::strip_mentions(&event.text);

        let (user_name, channel_name) = tokio::join!(
            async {
                match event.user.as_deref() {
                    Some(user_id) => self.slack.resolve_user_name(user_id).await,
                    None => "unknown".to_string(),
                }
            },
            self.slack.resolve_channel_name(&event.channel),
        );
        tracing::info!(
            user = %user_name,
            channel = %channel_name,
            text = %text,
            "Triggered"
        );

        if let Some(log_channel) = self.log_channel.clone() {
            let slack = Arc::clone(&self.slack);
            let event = event.clone();
            let text = text.clone();
            tokio::spawn(async move {
                if let Err(e) = post_audit_record(&slack, &log_channel, &event, &text).await {
                    tracing::warn!(error = %e, "Failed to post audit record");
                }
            });
        }

        let work = {
            let slack = Arc::clone(&self.slack);
            let agent = Arc::clone(&self.agent);
            let credentials = Arc::clone(&self.credentials);
            let channel = event.channel.clone();
            let message_ts = event.ts.clone();
            let thread_id = thread_id.clone();
            move || run_job(slack, agent, credentials, channel, message_ts, thread_id)
        };

        match self.scheduler.submit(&thread_id, work) {
            SubmitOutcome::ThreadBusy => {
                self.notify(&event.channel, &thread_id, BUSY_NOTICE).await;
            }
            SubmitOutcome::QueueFull => {
                tracing::warn!(
                    running = self.scheduler.running_count(),
                    queued = self.scheduler.queue_depth(),
                    "Rejecting request, queue full"
                );
                self.notify(&event.channel, &thread_id, OVERLOADED_NOTICE).await;
            }
            SubmitOutcome::Accepted(done) => {
                let slack = Arc::clone(&self.slack);
                let channel = event.channel.clone();
                let message_ts = event.ts.clone();
                tokio::spawn(async move {
                    let Err(err) = done.wait().await else { return };
                    tracing::error!(thread_id = %thread_id, error = %err, "Agent job failed");
                    // Best-effort cleanup; signaling failures are swallowed
                    // so this handler can never itself fail.
                    let _ = slack
                        .remove_reaction(&channel, &message_ts, IN_PROGRESS_REACTION)
                        .await;
                    let _ = slack
                        .add_reaction(&channel, &message_ts, FAILURE_REACTION)
                        .await;
                    let notice = format!("Something went wrong: {err}");
                    if let Err(e) = slack.post_message(&channel, &thread_id, &notice).await {
                        tracing::warn!(error = %e, "Failed to post failure notice");
                    }
                });
            }
        }
    }

    async fn notify(&self, channel: &str, thread_id: &str, text: &str) {
        if let Err(e) = self.slack.post_message(channel, thread_id, text).await {
            tracing::warn!(error = %e, "Failed to post notice");
        }
    }
}

/// The scheduled unit of work: full lifecycle for one admitted job, then a
/// detached credential sync regardless of outcome.
async fn run_job(
    slack: Arc<SlackClient>,
    agent: Arc<dyn AgentRunner>,
    credentials: Arc<CredentialSync>,
    channel: String,
    message_ts: String,
    thread_id: String,
) -> Result<(), Error> {
    let outcome = run_lifecycle(&slack, &agent, &channel, &message_ts, &thread_id).await;

    // Side channel, never joined into the job outcome.
    tokio::spawn(async move {
        credentials.sync_if_changed().await;
    });

    outcome
}

async fn run_lifecycle(
    slack: &SlackClient,
    agent: &Arc<dyn AgentRunner>,
    channel: &str,
    message_ts: &str,
    thread_id: &str,
) -> Result<(), Error> {
    slack
        .add_reaction(channel, message_ts, IN_PROGRESS_REACTION)
        .await?;

    let transcript = slack.render_thread(channel, thread_id).await?;
    let response = agent.invoke(thread_id, &transcript).await?;

    slack
        .remove_reaction(channel, message_ts, IN_PROGRESS_REACTION)
        .await?;

    if response.is_empty() {
        slack
            .add_reaction(channel, message_ts, EMPTY_REACTION)
            .await?;
        slack
            .post_message(channel, thread_id, EMPTY_RESULT_NOTICE)
            .await?;
    } else {
        slack
            .add_reaction(channel, message_ts, SUCCESS_REACTION)
            .await?;
        slack
            .post_message(channel, thread_id, &slack::markdown_to_mrkdwn(&response))
            .await?;
    }
    Ok(())
}

/// Audit record for the log channel: who triggered, where, what, permalink.
async fn post_audit_record(
    slack: &SlackClient,
    log_channel: &str,
    event: &MentionEvent,
    text: &str,
) -> anyhow::Result<()> {
    let permalink = slack.get_permalink(&event.channel, &event.ts).await?;
    let author = event.user.as_deref().unwrap_or("unknown");
    let record = format!(
        "*<@{author}>* in <#{}>: {text}\n<{permalink}|View message>",
        event.channel
    );
    slack.post_channel_message(log_channel, &record).await?;
    Ok(())
}
