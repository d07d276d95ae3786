//! Client for the remote OCR job service: submit, then poll to completion.

use std::{sync::Arc, time::Duration};

use tokio::time;

use crate::{
    document::Document,
    error::OffloadError,
    pipeline::OcrText,
    prelude::*,
    transport::{JobTransport, PollResponse},
};

/// State of a remote job, as reported by the service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobState {
    /// Submitted, no poll answered yet.
    Pending,
    /// The service is still working.
    InProgress,
    /// Terminal: the extracted text.
    Done(String),
    /// Terminal: the service reported a job-level error.
    Error(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done(_) | JobState::Error(_))
    }

    /// Apply one poll response, moving only forward.
    ///
    /// Terminal states are never left, and an `error` field wins over
    /// whatever `status` claims.
    fn advance(self, response: &PollResponse) -> Result<JobState, OffloadError> {
        if self.is_terminal() {
            return Ok(self);
        }
        if let Some(message) = &response.error {
            return Ok(JobState::Error(message.clone()));
        }
        match response.status.as_deref() {
            Some("IN_PROGRESS") => Ok(JobState::InProgress),
            Some("DONE") => match &response.result {
                Some(text) => Ok(JobState::Done(text.clone())),
                None => Err(OffloadError::Protocol(
                    "DONE response had no result field".to_owned(),
                )),
            },
            other => Err(OffloadError::Protocol(format!(
                "unexpected job status {other:?}"
            ))),
        }
    }
}

/// One remote submission.
#[derive(Debug)]
pub struct Job {
    pub job_id: String,
    pub state: JobState,
}

/// How the client waits on an in-progress job.
#[derive(Clone, Debug)]
pub struct PollPolicy {
    /// Delay between status polls.
    pub interval: Duration,
    /// Give up after this many polls. `None` polls until the job is terminal,
    /// which risks hanging forever on a wedged service.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: Some(120),
        }
    }
}

/// Submits documents to a remote job endpoint and polls until completion.
pub struct RemoteOcrClient {
    transport: Arc<dyn JobTransport>,
    policy: PollPolicy,
}

impl RemoteOcrClient {
    pub fn new(transport: Arc<dyn JobTransport>, policy: PollPolicy) -> Self {
        Self { transport, policy }
    }

    /// Submit a document, returning the pending job.
    ///
    /// No poll is ever issued for a submission that failed or came back
    /// without a `job_id`.
    #[instrument(level = "debug", skip_all, fields(path = %document.path().display()))]
    pub async fn submit(&self, document: &Document) -> Result<Job, OffloadError> {
        let pdf = tokio::fs::read(document.path()).await.map_err(|err| {
            OffloadError::io(anyhow!(
                "cannot read {}: {}",
                document.path().display(),
                err
            ))
        })?;
        let filename = document
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_owned());

        let response = self.transport.submit(pdf, filename).await?;
        let job_id = response.job_id.ok_or_else(|| {
            OffloadError::Protocol("submission response had no job_id field".to_owned())
        })?;
        debug!(%job_id, "job submitted");
        Ok(Job {
            job_id,
            state: JobState::Pending,
        })
    }

    /// Poll once, advancing the job's state.
    pub async fn poll(&self, job: &mut Job) -> Result<(), OffloadError> {
        let response = self.transport.poll(&job.job_id).await?;
        job.state = job.state.clone().advance(&response)?;
        Ok(())
    }

    /// Submit and poll on a fixed interval until the job reaches a terminal
    /// state, or until the policy's attempt limit is reached.
    #[instrument(level = "debug", skip_all)]
    pub async fn run_to_completion(
        &self,
        document: Document,
    ) -> Result<OcrText, OffloadError> {
        let page_count = document.page_count();
        let mut job = self.submit(&document).await?;
        // The upload is done; release the handle and its scratch files before
        // we settle in to wait.
        drop(document);

        // Poll right away; a fast job should not pay a full interval of dead
        // time. The sleep only separates re-polls.
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            self.poll(&mut job).await?;
            match &job.state {
                JobState::Done(text) => {
                    return Ok(OcrText {
                        text: text.clone(),
                        pages_ok: page_count,
                        page_count,
                    });
                }
                JobState::Error(message) => {
                    return Err(OffloadError::RemoteJob(message.clone()));
                }
                _ => debug!(job_id = %job.job_id, attempts, "job still in progress"),
            }

            if let Some(max) = self.policy.max_attempts
                && attempts >= max
            {
                return Err(OffloadError::transport(anyhow!(
                    "job {} not finished after {} polls",
                    job.job_id,
                    attempts
                )));
            }
            time::sleep(self.policy.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::transport::SubmitResponse;

    /// Transport that replays a scripted submission and poll sequence.
    struct ScriptedTransport {
        job_id: Option<String>,
        polls: Mutex<Vec<PollResponse>>,
        poll_count: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(job_id: Option<&str>, polls: Vec<PollResponse>) -> Arc<Self> {
            Arc::new(Self {
                job_id: job_id.map(str::to_owned),
                polls: Mutex::new(polls),
                poll_count: AtomicUsize::new(0),
            })
        }

        fn poll_count(&self) -> usize {
            self.poll_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobTransport for ScriptedTransport {
        async fn submit(
            &self,
            _pdf: Vec<u8>,
            _filename: String,
        ) -> Result<SubmitResponse, OffloadError> {
            Ok(SubmitResponse {
                job_id: self.job_id.clone(),
            })
        }

        async fn poll(&self, _job_id: &str) -> Result<PollResponse, OffloadError> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            let mut polls = self.polls.lock().expect("lock poisoned");
            if polls.is_empty() {
                Ok(in_progress())
            } else {
                Ok(polls.remove(0))
            }
        }
    }

    fn in_progress() -> PollResponse {
        PollResponse {
            status: Some("IN_PROGRESS".to_owned()),
            ..PollResponse::default()
        }
    }

    fn done(text: &str) -> PollResponse {
        PollResponse {
            status: Some("DONE".to_owned()),
            result: Some(text.to_owned()),
            ..PollResponse::default()
        }
    }

    fn fast_policy(max_attempts: Option<u32>) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    fn test_document(dir: &Path) -> Result<Document> {
        let path = dir.join("sample.pdf");
        std::fs::write(&path, b"%PDF-1.4 fake")?;
        Ok(Document::from_parts(path, 2, 13)?)
    }

    #[tokio::test]
    async fn polls_until_done_and_returns_the_result() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("remote")?;
        let transport = ScriptedTransport::new(
            Some("job-1"),
            vec![in_progress(), in_progress(), done("extracted text")],
        );
        let client = RemoteOcrClient::new(transport.clone(), fast_policy(None));

        let result = client
            .run_to_completion(test_document(tmpdir.path())?)
            .await?;
        assert_eq!(result.text, "extracted text");
        assert_eq!(result.page_count, 2);
        assert!(result.is_complete());
        assert_eq!(transport.poll_count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn missing_job_id_fails_without_polling() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("remote")?;
        let transport = ScriptedTransport::new(None, vec![done("never seen")]);
        let client = RemoteOcrClient::new(transport.clone(), fast_policy(None));

        let err = client
            .run_to_completion(test_document(tmpdir.path())?)
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::Protocol(_)), "{err}");
        assert_eq!(transport.poll_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn error_field_wins_over_status() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("remote")?;
        let poisoned = PollResponse {
            status: Some("DONE".to_owned()),
            result: Some("partial".to_owned()),
            error: Some("worker crashed".to_owned()),
        };
        let transport = ScriptedTransport::new(Some("job-2"), vec![poisoned]);
        let client = RemoteOcrClient::new(transport, fast_policy(None));

        let err = client
            .run_to_completion(test_document(tmpdir.path())?)
            .await
            .unwrap_err();
        match err {
            OffloadError::RemoteJob(message) => assert_eq!(message, "worker crashed"),
            other => panic!("expected RemoteJob, got {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn fast_jobs_finish_without_waiting_an_interval() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("remote")?;
        let transport = ScriptedTransport::new(Some("job-5"), vec![done("quick")]);
        let slow_policy = PollPolicy {
            interval: Duration::from_secs(30),
            max_attempts: None,
        };
        let client = RemoteOcrClient::new(transport.clone(), slow_policy);

        let started = std::time::Instant::now();
        let result = client
            .run_to_completion(test_document(tmpdir.path())?)
            .await?;
        assert_eq!(result.text, "quick");
        assert_eq!(transport.poll_count(), 1);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "first poll waited for the interval"
        );
        Ok(())
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("remote")?;
        let transport = ScriptedTransport::new(Some("job-3"), vec![]);
        let client = RemoteOcrClient::new(transport.clone(), fast_policy(Some(4)));

        let err = client
            .run_to_completion(test_document(tmpdir.path())?)
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::Transport(_)), "{err}");
        assert_eq!(transport.poll_count(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn done_without_result_is_a_protocol_failure() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("remote")?;
        let bare_done = PollResponse {
            status: Some("DONE".to_owned()),
            ..PollResponse::default()
        };
        let transport = ScriptedTransport::new(Some("job-4"), vec![bare_done]);
        let client = RemoteOcrClient::new(transport, fast_policy(None));

        let err = client
            .run_to_completion(test_document(tmpdir.path())?)
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::Protocol(_)), "{err}");
        Ok(())
    }

    #[test]
    fn terminal_states_never_transition() -> Result<()> {
        let terminal = JobState::Done("text".to_owned());
        let next = terminal.clone().advance(&in_progress())?;
        assert_eq!(next, terminal);

        let failed = JobState::Error("boom".to_owned());
        let next = failed.clone().advance(&done("late result"))?;
        assert_eq!(next, failed);
        Ok(())
    }

    #[test]
    fn pending_advances_forward_only() -> Result<()> {
        let state = JobState::Pending.advance(&in_progress())?;
        assert_eq!(state, JobState::InProgress);

        let state = state.advance(&done("text"))?;
        assert_eq!(state, JobState::Done("text".to_owned()));
        Ok(())
    }
}
