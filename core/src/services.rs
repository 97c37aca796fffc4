use std::fmt;
use std::sync::Arc;

use crate::config::ForgeConfig;
use crate::errors::RecordError;
use crate::exec::LocalProcessRunner;
use crate::exec::RunnerSettings;
use crate::record::FileRecordStore;
use crate::record::InMemoryRecordStore;
use crate::record::RecordStore;
use crate::session::SessionController;
use crate::session::SessionId;
use crate::stream::BroadcastChannel;
use crate::stream::ChaosBroadcast;
use crate::stream::ChaosConfig;
use crate::stream::LocalBroadcast;
use crate::stream::SessionView;

/// The collaborators one process needs, wired together once and shared.
#[derive(Clone)]
pub struct ForgeServices {
    pub channel: Arc<dyn BroadcastChannel>,
    pub records: Arc<dyn RecordStore>,
    pub sessions: Arc<SessionController>,
}

impl ForgeServices {
    pub fn new(
        channel: Arc<dyn BroadcastChannel>,
        records: Arc<dyn RecordStore>,
        settings: RunnerSettings,
    ) -> Self {
        let runner = Arc::new(LocalProcessRunner::new(
            Arc::clone(&channel),
            Arc::clone(&records),
            settings,
        ));
        let sessions = Arc::new(SessionController::new(runner, Arc::clone(&channel)));
        Self {
            channel,
            records,
            sessions,
        }
    }

    pub async fn from_config(config: &ForgeConfig, chaos: ChaosConfig) -> Result<Self, RecordError> {
        let records = open_record_store(config).await?;
        let hub = LocalBroadcast::new(config.channel.capacity);
        let channel: Arc<dyn BroadcastChannel> = if chaos.is_noop() {
            Arc::new(hub)
        } else {
            Arc::new(ChaosBroadcast::new(hub, chaos))
        };
        Ok(Self::new(channel, records, config.runner.settings()))
    }

    pub async fn open_view(&self, session_id: SessionId) -> SessionView {
        SessionView::attach(session_id, self.channel.as_ref(), self.records.as_ref()).await
    }
}

pub async fn open_record_store(config: &ForgeConfig) -> Result<Arc<dyn RecordStore>, RecordError> {
    Ok(match &config.records.dir {
        Some(dir) => Arc::new(FileRecordStore::open(dir).await?),
        None => Arc::new(InMemoryRecordStore::new()),
    })
}

impl fmt::Debug for ForgeServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForgeServices")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
