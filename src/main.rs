use carequery::config::AppConfig;
use carequery::pipeline::{PipelineResult, QueryPipeline};
use carequery::validation::{SqlValidator, ValidationResult};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "carequery")]
#[command(about = "Natural-language questions to ClickHouse SQL over healthcare analytics data")]
#[command(version)]
struct Args {
    /// JSON configuration file (default: built-in defaults plus environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, validate and score SQL for a question
    Ask {
        /// The question in natural language
        query: String,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Do not append the result to the query log
        #[arg(long)]
        no_log: bool,
    },
    /// Validate a SQL statement against ClickHouse
    Validate {
        sql: String,
    },
    /// Summarize the query log
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env(),
    };

    match args.command {
        Commands::Ask { query, json, no_log } => {
            if no_log {
                config.logging.enabled = false;
            }
            ask(&config, &query, json).await
        }
        Commands::Validate { sql } => validate(&config, &sql).await,
        Commands::Stats => stats(&config),
    }
}

async fn ask(config: &AppConfig, query: &str, json: bool) -> Result<()> {
    let pipeline = QueryPipeline::from_config(config).await?;
    let result = pipeline.process(query).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &PipelineResult) {
    println!("\n{}", "=".repeat(80));
    println!(" QUERY RESULT");
    println!("{}", "=".repeat(80));
    println!("\n Question: {}", result.query);
    println!(" Query type: {}", result.query_type);

    if !result.success {
        println!("\n Failed: {}", result.error.as_deref().unwrap_or("unknown error"));
        println!(" Source: {}", result.generation_source);
        println!(" Time: {:.2}s", result.processing_time);
        return;
    }

    println!("\n SQL ({}):", result.generation_source);
    println!("   {}", result.sql);

    if let Some(validation) = &result.validation {
        print_validation(validation);
    }

    println!(
        "\n Confidence: {:.1}% ({})",
        result.confidence * 100.0,
        result.confidence_grade.description()
    );
    if let Some(breakdown) = &result.confidence_breakdown {
        println!(
            "   Tiers: foundational {:.3}, semantic {:.3}, practical {:.3}",
            breakdown.tier_scores.tier_1.outcome.capped,
            breakdown.tier_scores.tier_2.outcome.capped,
            breakdown.tier_scores.tier_3.outcome.capped
        );
        for insight in &breakdown.insights {
            println!("   - {}", insight);
        }
    }

    println!("\n Quality score: {:.3}", result.quality_score);
    if let Some(evaluation) = &result.evaluation {
        for line in evaluation.summary_text().lines() {
            println!("   {}", line);
        }
    }

    println!("\n Time: {:.2}s", result.processing_time);
    println!("{}", "=".repeat(80));
}

fn print_validation(validation: &ValidationResult) {
    println!("\n Validation: {}", validation.validation_type);
    println!("   Valid: {}, executable: {}", validation.valid, validation.executable);
    if validation.executable {
        println!("   Rows: {}", validation.result_row_count);
    }
    if let Some(error) = &validation.error {
        println!("   Note: {}", error);
    }
}

async fn validate(config: &AppConfig, sql: &str) -> Result<()> {
    let validator = SqlValidator::from_config(&config.database);
    let validation = validator.validate(sql).await;
    print_validation(&validation);
    Ok(())
}

fn stats(config: &AppConfig) -> Result<()> {
    let log = carequery::observability::QueryLog::new(config.logging.csv_path.clone());
    info!("Reading query log from {}", log.path().display());
    let stats = log.statistics()?;

    println!("\n{}", "=".repeat(80));
    println!(" QUERY LOG STATISTICS");
    println!("{}", "=".repeat(80));
    println!("\n Total queries: {}", stats.total_queries);
    println!(" Successful: {}", stats.successful_queries);
    println!(" Average confidence: {:.1}%", stats.average_confidence * 100.0);
    println!(" Average processing time: {:.2}s", stats.average_processing_time);
    if stats.skipped_rows > 0 {
        println!(" Unreadable rows: {}", stats.skipped_rows);
    }

    println!("\n Query types:");
    for (query_type, count) in &stats.query_types {
        println!("   {}: {}", query_type, count);
    }
    println!("\n Generation sources:");
    for (source, count) in &stats.generation_sources {
        println!("   {}: {}", source, count);
    }
    Ok(())
}
