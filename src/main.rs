// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use chrio_lib::compare::{DiffValue, FieldValue, SessionDiff};
use chrio_lib::config::AppConfig;
use chrio_lib::model::{ClientInput, ClientUpdate, Sex, SessionFields};
use chrio_lib::state::AppState;
use chrio_lib::{commands, schema, AppError};

#[derive(Debug, Parser)]
#[command(name = "chrio", about = "Chrio client and session tracker", version)]
struct Cli {
    /// Use this database file instead of the configured one.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database setup and inspection.
    #[command(subcommand)]
    Db(DbCommand),
    /// Manage clients.
    #[command(subcommand)]
    Clients(ClientCommand),
    /// Manage recorded sessions.
    #[command(subcommand)]
    Sessions(SessionCommand),
    /// Manage the todo list.
    #[command(subcommand)]
    Todos(TodoCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Create the database file and schema if missing.
    Init,
    /// Report the database path, tables and row counts.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ClientCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    Add {
        #[arg(long)]
        firstname: String,
        #[arg(long)]
        lastname: String,
        /// Date of birth, YYYY-MM-DD.
        #[arg(long)]
        dob: String,
        /// M, F or O.
        #[arg(long)]
        sex: Sex,
    },
    Update {
        id: i64,
        #[arg(long)]
        firstname: Option<String>,
        #[arg(long)]
        lastname: Option<String>,
        #[arg(long)]
        dob: Option<String>,
        #[arg(long)]
        sex: Option<Sex>,
    },
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    List {
        client_id: i64,
        #[arg(long)]
        json: bool,
    },
    Add {
        client_id: i64,
        #[arg(long)]
        height: Option<f64>,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    Delete {
        client_id: i64,
        id: i64,
    },
    /// Field-by-field comparison of two sessions of one client.
    Compare {
        client_id: i64,
        session_a: i64,
        session_b: i64,
        #[arg(long)]
        json: bool,
        /// Hide fields that are equal in both sessions.
        #[arg(long)]
        changed_only: bool,
    },
}

#[derive(Debug, Subcommand)]
enum TodoCommand {
    List,
    Add { title: String },
    Done { id: i64 },
}

fn main() {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    // The desktop shell installs its own file-backed subscriber.
    let Some(command) = cli.command else {
        launch_desktop();
        return;
    };
    if let Err(err) = chrio_lib::init_logging() {
        eprintln!("logging unavailable: {err:#}");
    }

    match handle_cli(config, command) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

#[cfg(feature = "desktop")]
fn launch_desktop() {
    chrio_lib::run()
}

#[cfg(not(feature = "desktop"))]
fn launch_desktop() {
    use clap::CommandFactory;
    let _ = Cli::command().print_help();
}

fn handle_cli(config: AppConfig, command: Commands) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(async move {
        let state = AppState::initialize(config).await;
        let code = match command {
            Commands::Db(cmd) => handle_db(&state, cmd).await,
            Commands::Clients(cmd) => handle_clients(&state, cmd).await,
            Commands::Sessions(cmd) => handle_sessions(&state, cmd).await,
            Commands::Todos(cmd) => handle_todos(&state, cmd).await,
        };
        state.close().await;
        code
    })
}

fn report_error(err: &AppError) -> i32 {
    eprintln!("Error: {} ({})", err.message(), err.code());
    1
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{serialized}");
    Ok(())
}

async fn handle_db(state: &AppState, command: DbCommand) -> Result<i32> {
    let db_path = state.config.db_path.display().to_string();
    if let Some(err) = state.storage_error() {
        return Ok(report_error(err));
    }
    let Some(pool) = state.pool() else {
        return Ok(1);
    };

    match command {
        DbCommand::Init => {
            println!("Database ready at {db_path}");
            Ok(0)
        }
        DbCommand::Status { json } => {
            let tables = schema::table_names(pool).await?;
            let mut counts = Vec::with_capacity(tables.len());
            for table in schema::TABLES {
                let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(pool)
                    .await
                    .with_context(|| format!("count rows in {table}"))?;
                counts.push((*table, count));
            }

            if json {
                let rows: serde_json::Map<String, serde_json::Value> = counts
                    .iter()
                    .map(|(table, count)| (table.to_string(), json!(count)))
                    .collect();
                print_json(&json!({
                    "path": db_path,
                    "tables": tables,
                    "rows": rows,
                }))?;
            } else {
                println!("Database     : {db_path}");
                println!("Tables       : {}", tables.join(", "));
                for (table, count) in &counts {
                    println!("{table:<12} : {count}");
                }
            }
            Ok(0)
        }
    }
}

async fn handle_clients(state: &AppState, command: ClientCommand) -> Result<i32> {
    match command {
        ClientCommand::List { json } => match commands::get_clients(state).await.into_result() {
            Ok(clients) if json => {
                print_json(&clients)?;
                Ok(0)
            }
            Ok(clients) => {
                println!("{:>5}  {:<20} {:<20} {:<10} {:<3} Registered", "ID", "First", "Last", "DOB", "Sex");
                for c in clients {
                    println!(
                        "{:>5}  {:<20} {:<20} {:<10} {:<3} {}",
                        c.id, c.firstname, c.lastname, c.dob, c.sex, c.registration_date
                    );
                }
                Ok(0)
            }
            Err(err) => Ok(report_error(&err)),
        },
        ClientCommand::Add {
            firstname,
            lastname,
            dob,
            sex,
        } => {
            let input = ClientInput::new(firstname, lastname, dob, sex);
            match state.clients.create_client(input).await {
                Ok(id) => {
                    println!("Created client {id}");
                    Ok(0)
                }
                Err(err) => Ok(report_error(&err)),
            }
        }
        ClientCommand::Update {
            id,
            firstname,
            lastname,
            dob,
            sex,
        } => {
            let update = ClientUpdate {
                firstname,
                lastname,
                dob,
                sex,
            };
            match state.clients.update_client_entry(id, update).await {
                Ok(()) => {
                    println!("Updated client {id}");
                    Ok(0)
                }
                Err(err) => Ok(report_error(&err)),
            }
        }
    }
}

fn describe(value: &DiffValue) -> String {
    match value {
        DiffValue::Absent => "-".to_string(),
        DiffValue::Present(FieldValue::Number(n)) => n.to_string(),
        DiffValue::Present(FieldValue::Text(t)) if t.chars().count() > 40 => {
            format!("{}…", t.chars().take(40).collect::<String>())
        }
        DiffValue::Present(FieldValue::Text(t)) => t.clone(),
    }
}

fn print_diff(diff: &SessionDiff, changed_only: bool) {
    println!(
        "Client {}: session {} vs session {}",
        diff.client_id, diff.session_a, diff.session_b
    );
    println!("{:<20} {:<42} {:<42}", "Field", "A", "B");
    for field in &diff.fields {
        if changed_only && field.is_unchanged() {
            continue;
        }
        let marker = if field.is_unchanged() { ' ' } else { '*' };
        println!(
            "{marker}{:<19} {:<42} {:<42}",
            field.field.as_str(),
            describe(&field.a),
            describe(&field.b)
        );
    }
}

async fn handle_sessions(state: &AppState, command: SessionCommand) -> Result<i32> {
    match command {
        SessionCommand::List { client_id, json } => {
            match state.sessions.refresh_sessions(client_id).await {
                Ok(()) => {
                    let sessions = state.sessions.snapshot(client_id).items;
                    if json {
                        print_json(&sessions)?;
                    } else {
                        println!("{:>5}  {:>3}  {:<25} {:>7} {:>7}", "ID", "No", "Recorded", "Height", "Weight");
                        for s in sessions {
                            let height = s.fields.height.map(|v| v.to_string()).unwrap_or_default();
                            let weight = s.fields.weight.map(|v| v.to_string()).unwrap_or_default();
                            println!(
                                "{:>5}  {:>3}  {:<25} {:>7} {:>7}",
                                s.id, s.session_number, s.datetime, height, weight
                            );
                        }
                    }
                    Ok(0)
                }
                Err(err) => Ok(report_error(&err)),
            }
        }
        SessionCommand::Add {
            client_id,
            height,
            weight,
            notes,
        } => {
            let fields = SessionFields {
                height,
                weight,
                notes,
                ..SessionFields::default()
            };
            match state.sessions.create_session(client_id, fields).await {
                Ok(id) => {
                    println!("Created session {id}");
                    Ok(0)
                }
                Err(err) => Ok(report_error(&err)),
            }
        }
        SessionCommand::Delete { client_id, id } => {
            match state.sessions.delete_session_entry(client_id, id).await {
                Ok(()) => {
                    println!("Deleted session {id}");
                    Ok(0)
                }
                Err(err) => Ok(report_error(&err)),
            }
        }
        SessionCommand::Compare {
            client_id,
            session_a,
            session_b,
            json,
            changed_only,
        } => match state.sessions.compare(client_id, session_a, session_b).await {
            Ok(diff) if json => {
                print_json(&diff)?;
                Ok(0)
            }
            Ok(diff) => {
                print_diff(&diff, changed_only);
                Ok(0)
            }
            Err(err) => Ok(report_error(&err)),
        },
    }
}

async fn handle_todos(state: &AppState, command: TodoCommand) -> Result<i32> {
    let outcome = match command {
        TodoCommand::List => commands::get_todos(state).await.into_result().map(|todos| {
            for todo in todos {
                let mark = if todo.completed { 'x' } else { ' ' };
                println!("[{mark}] {:>4}  {}", todo.id, todo.title);
            }
        }),
        TodoCommand::Add { title } => commands::add_todo(state, title)
            .await
            .into_result()
            .map(|id| println!("Created todo {id}")),
        TodoCommand::Done { id } => commands::set_todo_completed(state, id, true)
            .await
            .into_result()
            .map(|()| println!("Completed todo {id}")),
    };
    Ok(match outcome {
        Ok(()) => 0,
        Err(err) => report_error(&err),
    })
}
