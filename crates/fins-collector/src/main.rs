//! 시장 데이터 업데이터 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 전체 사이클 한 번
//! fins-collector run-all
//!
//! # 8시간 주기 데몬
//! fins-collector daemon
//!
//! # 특정 티커 프로필만 갱신
//! fins-collector update-profiles --ticker AAPL --ticker SAP.DE
//!
//! # 가격 갱신 기록을 지워 오늘 다시 실행
//! fins-collector reset batch-log prices
//!
//! # 분석 패키지 생성
//! fins-collector analyze --name "Large caps" --from 2015-01-01 --to 2024-12-31 --mcap-min 10000000000
//! ```

use anyhow::{anyhow, Context};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use fins_analytics::{HistogramConfig, OutlierMode, PackageService, PackageSpec};
use fins_collector::modules::{self, DedupeFilter, StageRunner};
use fins_collector::{CollectorConfig, Stage, StageStats, UpdaterContext};
use fins_core::{init_logging, AppConfig, Interval, LogConfig};
use fins_data::{Database, FmpClient, MarketDataSource};

#[derive(Parser)]
#[command(name = "fins-collector")]
#[command(about = "Market data updater and YoY analysis", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (RUST_LOG이 없을 때 사용)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Stage(StageCommand),

    #[command(flatten)]
    Admin(AdminCommand),
}

/// 공급자가 필요한 스테이지 명령.
#[derive(Subcommand)]
enum StageCommand {
    /// 심볼 목록 동기화
    SyncSymbols,

    /// 프로필 갱신 (티커를 주면 개별 조회)
    UpdateProfiles {
        #[arg(long = "ticker")]
        tickers: Vec<String>,
    },

    /// 현재가 갱신 (벌크 EOD)
    UpdateQuotes,

    /// 가격 이력 갱신
    UpdatePrices,

    /// 중복 상장 정리
    Dedupe {
        /// 패스별 최대 그룹 수 (0 = 무제한)
        #[arg(long, default_value_t = 0)]
        max_groups: usize,

        /// 이 티커를 포함하는 그룹만
        #[arg(long = "ticker")]
        tickers: Vec<String>,
    },

    /// 다섯 스테이지를 한 번 실행
    RunAll,

    /// 종료 신호까지 사이클 반복
    Daemon,
}

/// DB만 쓰는 관리 명령.
#[derive(Subcommand)]
enum AdminCommand {
    /// 갱신 상태 초기화
    Reset {
        #[command(subcommand)]
        target: ResetTarget,
    },

    /// 에러 로그
    Errors {
        #[command(subcommand)]
        action: ErrorsAction,
    },

    /// 저장소 현황
    Status,

    /// 분석 패키지 생성 후 실행
    Analyze {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "monthly")]
        interval: Interval,

        #[arg(long)]
        from: NaiveDate,

        #[arg(long)]
        to: NaiveDate,

        #[arg(long, default_value_t = 40)]
        bins: usize,

        #[arg(long, default_value_t = -100.0, allow_hyphen_values = true)]
        hist_min: f64,

        #[arg(long, default_value_t = 300.0)]
        hist_max: f64,

        /// USD 시가총액 하한
        #[arg(long)]
        mcap_min: Option<i64>,

        /// 상장일 상한
        #[arg(long)]
        inception_max: Option<NaiveDate>,

        #[arg(long, value_enum, default_value_t = OutlierArg::Balanced)]
        outliers: OutlierArg,

        #[arg(long, default_value_t = fins_analytics::batch::DEFAULT_WORKERS)]
        workers: usize,
    },

    /// 분석 패키지 관리
    Packages {
        #[command(subcommand)]
        action: PackagesAction,
    },
}

#[derive(Subcommand)]
enum ResetTarget {
    /// 프로필 갱신 시각
    Profiles,
    /// 가격 갱신 시각
    Prices,
    /// 현재가 시각
    Quotes,
    /// 지수 가격 갱신 시각
    Indices,
    /// 대표 상장 지정
    Dedupe,
    /// 한 심볼의 모든 갱신 상태
    Symbol { ticker: String },
    /// 스테이지 실행 기록 (오늘 다시 실행 가능)
    BatchLog {
        #[arg(value_enum)]
        stage: Stage,
    },
}

#[derive(Subcommand)]
enum ErrorsAction {
    List {
        #[arg(long)]
        source: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// N일보다 오래된 항목 삭제 (0이면 전부)
    Clear {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum PackagesAction {
    List,
    Show { id: Uuid },
    Rename { id: Uuid, name: String },
    Delete { id: Uuid },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutlierArg {
    Balanced,
    Conservative,
    Winsorized,
}

impl From<OutlierArg> for OutlierMode {
    fn from(arg: OutlierArg) -> Self {
        match arg {
            OutlierArg::Balanced => OutlierMode::Balanced,
            OutlierArg::Conservative => OutlierMode::Conservative,
            OutlierArg::Winsorized => OutlierMode::Winsorized,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app = AppConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;
    let mut log_config = LogConfig::from_settings(&app.logging);
    if let Some(level) = &cli.log_level {
        log_config.level = level.clone();
    }
    init_logging(log_config).map_err(|e| anyhow!("로깅 초기화 실패: {}", e))?;

    info!("fins-collector 시작");

    let db = Database::connect(&app.database).await?;
    db.migrate().await?;

    let shutdown = CancellationToken::new();

    let result = match cli.command {
        Commands::Stage(command) => {
            // API 키 오류는 여기서 종료
            let client = Arc::new(FmpClient::from_config(&app.provider).context("공급자 설정 오류")?);
            spawn_signal_handler(shutdown.clone(), Some(client.clone()));

            let source: Arc<dyn MarketDataSource> = client;
            let ctx = UpdaterContext::new(db.clone(), source, CollectorConfig::from_env(), shutdown);
            run_stage_command(command, &ctx).await
        }
        Commands::Admin(command) => {
            spawn_signal_handler(shutdown, None);
            run_admin_command(command, &db).await
        }
    };

    db.pool().close().await;
    info!("fins-collector 종료");
    result
}

fn spawn_signal_handler(shutdown: CancellationToken, client: Option<Arc<FmpClient>>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("종료 신호 수신, 진행 중인 작업을 마무리합니다");
            shutdown.cancel();
            if let Some(client) = client {
                client.shutdown();
            }
        }
    });
}

async fn run_stage_command(command: StageCommand, ctx: &UpdaterContext) -> anyhow::Result<()> {
    match command {
        StageCommand::SyncSymbols => report(ctx.run_stage(Stage::Symbols).await?),
        StageCommand::UpdateProfiles { tickers } if tickers.is_empty() => {
            report(ctx.run_stage(Stage::Profiles).await?)
        }
        StageCommand::UpdateProfiles { tickers } => {
            report(modules::update_profiles_for(ctx, tickers).await?)
        }
        StageCommand::UpdateQuotes => report(ctx.run_stage(Stage::Quotes).await?),
        StageCommand::UpdatePrices => report(ctx.run_stage(Stage::Prices).await?),
        StageCommand::Dedupe { max_groups, tickers } => {
            let filter = DedupeFilter { max_groups, tickers };
            report(modules::dedupe_listings_with(ctx, &filter).await?)
        }
        StageCommand::RunAll => {
            let cycle = modules::run_cycle(ctx, &ctx.shutdown).await;
            let failed = cycle.failed_stages();
            if !failed.is_empty() && !cycle.cancelled {
                warn!(failed = ?failed, "일부 스테이지 실패");
                return Err(anyhow!("{}개 스테이지 실패: {:?}", failed.len(), failed));
            }
        }
        StageCommand::Daemon => {
            let interval = ctx.config.daemon.interval();
            modules::run_forever(ctx, &ctx.shutdown, interval).await;
        }
    }
    Ok(())
}

fn report(stats: StageStats) {
    if stats.stage_skipped {
        println!("오늘 이미 완료됨");
        return;
    }
    println!(
        "processed={} updated={} not_found={} failed={} skipped={} ({:.1}s)",
        stats.processed,
        stats.updated,
        stats.not_found,
        stats.failed,
        stats.skipped,
        stats.elapsed.as_secs_f64()
    );
}

async fn run_admin_command(command: AdminCommand, db: &Database) -> anyhow::Result<()> {
    match command {
        AdminCommand::Reset { target } => reset(db, target).await,
        AdminCommand::Errors { action } => errors(db, action).await,
        AdminCommand::Status => status(db).await,
        AdminCommand::Analyze {
            name,
            interval,
            from,
            to,
            bins,
            hist_min,
            hist_max,
            mcap_min,
            inception_max,
            outliers,
            workers,
        } => {
            let spec = PackageSpec {
                name,
                interval,
                time_from: from,
                time_to: to,
                histogram: HistogramConfig::new(bins, hist_min, hist_max),
                mcap_min,
                inception_max,
            };
            let service = PackageService::new(db.clone())
                .with_workers(workers)
                .with_outliers(outliers.into());
            let (package, outcome) = service.create_and_run(&spec).await?;
            println!(
                "package {} ready: {} results, {} rejected",
                package.id,
                outcome.results.len(),
                outcome.total_rejected()
            );
            for (reason, count) in &outcome.rejections {
                println!("  {}: {}", reason, count);
            }
            Ok(())
        }
        AdminCommand::Packages { action } => packages(db, action).await,
    }
}

async fn reset(db: &Database, target: ResetTarget) -> anyhow::Result<()> {
    let symbols = db.symbols();
    let affected = match target {
        ResetTarget::Profiles => symbols.reset_profile_timestamps().await?,
        ResetTarget::Prices => symbols.reset_price_timestamps().await?,
        ResetTarget::Quotes => symbols.reset_quote_timestamps().await?,
        ResetTarget::Indices => symbols.reset_index_timestamps().await?,
        ResetTarget::Dedupe => symbols.reset_primary_listings().await?,
        ResetTarget::Symbol { ticker } => {
            symbols.reset_symbol(&ticker).await?;
            1
        }
        ResetTarget::BatchLog { stage } => db.batch_log().delete(stage.as_str()).await?,
    };
    println!("{} rows reset", affected);
    Ok(())
}

async fn errors(db: &Database, action: ErrorsAction) -> anyhow::Result<()> {
    let repo = db.errors();
    match action {
        ErrorsAction::List { source, limit } => {
            let records = match source {
                Some(source) => repo.by_source(&source, limit).await?,
                None => repo.recent(limit).await?,
            };
            for r in records {
                println!(
                    "{} [{}] {} {}: {}",
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    r.id,
                    r.source,
                    r.error_type,
                    r.message
                );
            }
        }
        ErrorsAction::Clear { days } => {
            let removed = if days <= 0 {
                repo.clear_all().await?
            } else {
                repo.clear_older_than(Utc::now() - ChronoDuration::days(days)).await?
            };
            println!("{} error entries removed", removed);
        }
    }
    Ok(())
}

async fn status(db: &Database) -> anyhow::Result<()> {
    let config = CollectorConfig::from_env();
    let status = db.symbols().status(config.price.stale_before(Utc::now())).await?;
    println!("symbols:           {}", status.symbols);
    println!("actively trading:  {}", status.actively_trading);
    println!("stale profiles:    {}", status.stale_profiles);
    println!("stale prices:      {}", status.stale_prices);
    if let Some(t) = status.oldest_profile_update {
        println!("oldest profile:    {}", t.format("%Y-%m-%d %H:%M"));
    }
    if let Some(t) = status.oldest_price_update {
        println!("oldest price:      {}", t.format("%Y-%m-%d %H:%M"));
    }

    for run in db.batch_log().latest_per_stage().await? {
        println!(
            "{:<14} {:<10} started {} processed={} updated={}",
            run.updater_name,
            run.status.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.symbols_processed,
            run.symbols_updated
        );
    }
    Ok(())
}

async fn packages(db: &Database, action: PackagesAction) -> anyhow::Result<()> {
    let service = PackageService::new(db.clone());
    match action {
        PackagesAction::List => {
            for p in service.list().await? {
                println!(
                    "{} {:<24} {:<10} {} {}..{} symbols={}",
                    p.id,
                    p.name,
                    p.status.as_str(),
                    p.interval,
                    p.time_from,
                    p.time_to,
                    p.symbol_count
                );
            }
        }
        PackagesAction::Show { id } => {
            let package = service.get(id).await?;
            println!("{} ({}), status {}", package.name, package.id, package.status.as_str());
            for r in service.results(id).await? {
                println!(
                    "{:<12} n={:<4} mean={:>8.2} stddev={:>8.2} min={:>8.2} max={:>8.2}",
                    r.ticker, r.count, r.mean, r.stddev, r.min, r.max
                );
            }
        }
        PackagesAction::Rename { id, name } => {
            let package = service.rename(id, &name).await?;
            println!("renamed {} to {}", package.id, package.name);
        }
        PackagesAction::Delete { id } => {
            service.delete(id).await?;
            println!("deleted {}", id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["fins-collector"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn test_stage_commands_keep_flat_names() {
        assert!(matches!(parse(&["run-all"]), Commands::Stage(StageCommand::RunAll)));
        match parse(&["update-profiles", "--ticker", "AAPL", "--ticker", "SAP.DE"]) {
            Commands::Stage(StageCommand::UpdateProfiles { tickers }) => {
                assert_eq!(tickers, vec!["AAPL", "SAP.DE"]);
            }
            _ => panic!("update-profiles should parse as a stage command"),
        }
    }

    #[test]
    fn test_admin_commands_keep_flat_names() {
        assert!(matches!(parse(&["status"]), Commands::Admin(AdminCommand::Status)));
        assert!(matches!(
            parse(&["reset", "batch-log", "prices"]),
            Commands::Admin(AdminCommand::Reset {
                target: ResetTarget::BatchLog { stage: Stage::Prices }
            })
        ));
        assert!(matches!(
            parse(&["errors", "clear", "--days", "0"]),
            Commands::Admin(AdminCommand::Errors { action: ErrorsAction::Clear { days: 0 } })
        ));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
