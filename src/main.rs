use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter, Stdout};
use tracing::info;

use ledger::app::{MigrateArgs, ProcessArgs, ReplayArgs};
use ledger::prelude::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    CliApp::new("ledger")
        .run(|stdout| run(cli.command, stdout))
        .await
}

async fn run(command: Command, mut stdout: BufWriter<Stdout>) -> Result<(), AppError> {
    match command {
        Command::Migrate(args) => migrate(args).await,
        Command::Replay(args) => replay(args, stdout).await,
        Command::Process(args) => process(args, &mut stdout).await,
    }
}

/// Install the schema, then provision any requested accounts
async fn migrate(args: MigrateArgs) -> Result<(), AppError> {
    let backend = PgLedgerBackend::connect(&args.db.pool_config()).await?;
    backend.install_schema().await?;

    for n in 1..=args.seed_accounts {
        backend
            .create_account(&format!("account-{n}"), args.opening_balance)
            .await?;
    }

    info!(
        seeded = args.seed_accounts,
        opening_balance = %args.opening_balance,
        "Migration complete"
    );
    Ok(())
}

async fn replay(args: ReplayArgs, stdout: BufWriter<Stdout>) -> Result<(), AppError> {
    let backend = PgLedgerBackend::connect(&args.db.pool_config()).await?;
    let coordinator = Arc::new(TransactionCoordinator::new(
        backend,
        args.timeouts.to_config(),
    ));

    let stream = if args.input == "-" {
        CsvEventStream::from_stdin()
    } else {
        CsvEventStream::from_file(&args.input).await?
    };

    let mut writer = OutcomeWriter::new(stdout);
    let summary = if args.abort_on_error {
        ReplayProcessor::new(coordinator, AbortOnError)
            .with_workers(args.workers)
            .process(stream, &mut writer)
            .await?
    } else {
        ReplayProcessor::new(coordinator, SkipErrors)
            .with_workers(args.workers)
            .process(stream, &mut writer)
            .await?
    };
    writer.finish().await?;

    if summary.aborted {
        return Err(AppError::ReplayAborted {
            processed: summary.processed(),
        });
    }
    Ok(())
}

/// Apply one event and print its outcome as JSON; failures still print a
/// body before the error is returned
async fn process<W>(args: ProcessArgs, stdout: &mut W) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    let event = WebhookEvent::new(
        args.account_id,
        args.provider_id,
        args.external_id,
        args.kind,
        args.amount,
    )?;

    let backend = PgLedgerBackend::connect(&args.db.pool_config()).await?;
    let coordinator = TransactionCoordinator::new(backend, args.timeouts.to_config());
    let result = coordinator.process(&event).await;

    let mut body = serde_json::to_vec_pretty(&OutcomeRecord::new(&event, &result))
        .map_err(IoError::from)?;
    body.push(b'\n');
    stdout.write_all(&body).await?;
    stdout.flush().await?;

    result.map(|_| ()).map_err(AppError::from)
}
