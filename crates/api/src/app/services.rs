//! Service wiring: stores, provider clients, and the services built on them.

use std::sync::Arc;

use tracing::{info, warn};

use creditscribe_infra::providers::{
    AssemblyAiClient, DevPaymentProvider, MercadoPagoClient, PaymentProvider,
    ScriptedTranscriptionProvider, TranscriptionProvider,
};
use creditscribe_infra::store::{InMemoryStore, JobStore, LedgerStore, PaymentStore, PgStore};
use creditscribe_infra::{AppConfig, JobRunner, Ledger, PaymentReconciler, StoreError};
use creditscribe_transcription::ExportFormat;

use crate::directory::{AccountDirectory, EmailTokenDirectory};

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub ledger: Ledger,
    pub runner: JobRunner,
    pub reconciler: PaymentReconciler,
    pub directory: Arc<dyn AccountDirectory>,
}

impl AppServices {
    /// Wire services over one store that backs all three repositories.
    pub fn assemble<S>(
        store: Arc<S>,
        transcription: Arc<dyn TranscriptionProvider>,
        payments: Arc<dyn PaymentProvider>,
        config: &AppConfig,
    ) -> Self
    where
        S: LedgerStore + JobStore + PaymentStore + 'static,
    {
        let ledger = Ledger::new(store.clone());
        let runner = JobRunner::new(store.clone(), ledger.clone(), transcription, config.runner.clone());
        let reconciler = PaymentReconciler::new(store, ledger.clone(), payments, config.webhook_secret.clone());
        let directory = Arc::new(EmailTokenDirectory::new(ledger.clone(), config.signup_credits));
        Self {
            ledger,
            runner,
            reconciler,
            directory,
        }
    }
}

/// Pick stores and providers from configuration.
///
/// Missing credentials select the in-process implementations, with a warning.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    let transcription: Arc<dyn TranscriptionProvider> = match &config.assemblyai {
        Some(cfg) => Arc::new(AssemblyAiClient::new(cfg)),
        None => {
            warn!("ASSEMBLYAI_API_KEY not set; using the scripted transcription provider");
            Arc::new(dev_transcriber())
        }
    };

    let payments: Arc<dyn PaymentProvider> = match &config.mercadopago {
        Some(cfg) => Arc::new(MercadoPagoClient::new(cfg, &config.frontend_url, &config.webhook_url)),
        None => {
            warn!("MERCADOPAGO_ACCESS_TOKEN not set; using the development checkout provider");
            Arc::new(DevPaymentProvider::new(config.frontend_url.clone()))
        }
    };

    if config.webhook_secret.is_none() {
        warn!(target: "security", "MERCADOPAGO_WEBHOOK_SECRET not set; webhook signatures will not be verified");
    }

    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.ensure_schema().await?;
            info!("using postgres stores");
            Ok(AppServices::assemble(Arc::new(store), transcription, payments, config))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory stores");
            Ok(AppServices::assemble(
                Arc::new(InMemoryStore::new()),
                transcription,
                payments,
                config,
            ))
        }
    }
}

fn dev_transcriber() -> ScriptedTranscriptionProvider {
    let provider = ScriptedTranscriptionProvider::completing_after(1, "Transcripción de prueba.", 90_000);
    provider.set_export(
        ExportFormat::Srt,
        "1\n00:00:00,000 --> 00:00:05,000\nTranscripción de prueba.\n",
    );
    provider.set_export(
        ExportFormat::Vtt,
        "WEBVTT\n\n00:00:00.000 --> 00:00:05.000\nTranscripción de prueba.\n",
    );
    provider
}
