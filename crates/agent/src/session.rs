//! Per-conversation state and the in-flight guard.

use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use toolbox_core::display::DisplayLog;
use toolbox_core::error::ProviderError;
use toolbox_core::message::{History, UserInput};
use toolbox_core::persona::Persona;
use toolbox_core::usage::TokenUsage;

use crate::orchestrator::{Orchestrator, TurnSummary};
use crate::sink::PresentationSink;

#[derive(Debug, Error)]
pub enum TurnError {
    /// The model call failed; the turn was aborted and History left at its
    /// last complete message.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("A turn is already in progress for this session")]
    TurnInFlight,
}

/// Everything one conversation owns. Held by the caller and lent to the
/// orchestrator for the duration of a turn.
#[derive(Debug, Clone)]
pub struct Session {
    persona: Persona,
    system_prompt: String,
    pub(crate) history: History,
    pub(crate) display: DisplayLog,
    pub(crate) usage: TokenUsage,
}

impl Session {
    pub fn new(persona: Persona) -> Self {
        let system_prompt = persona.render_prompt(Local::now());
        Self {
            persona,
            system_prompt,
            history: History::new(),
            display: DisplayLog::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn display(&self) -> &DisplayLog {
        &self.display
    }

    /// Cumulative usage since the session started or was last reset.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Start over with the same persona.
    pub fn new_chat(&mut self) {
        self.history.clear();
        self.display.clear();
        self.usage = TokenUsage::default();
        self.system_prompt = self.persona.render_prompt(Local::now());
    }

    /// Switch persona. The conversation so far is kept.
    pub fn set_persona(&mut self, persona: Persona) {
        self.system_prompt = persona.render_prompt(Local::now());
        self.persona = persona;
    }
}

/// Shared handle that allows at most one turn at a time.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Run one user turn. Fails fast instead of queueing when another turn
    /// is still running.
    pub async fn submit(
        &self,
        orchestrator: &Orchestrator,
        input: UserInput,
        sink: &mut dyn PresentationSink,
    ) -> Result<TurnSummary, TurnError> {
        let mut session = self.inner.try_lock().map_err(|_| TurnError::TurnInFlight)?;
        orchestrator.run_turn(&mut session, input, sink).await
    }

    /// Wait for any running turn and borrow the session.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().await
    }

    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
