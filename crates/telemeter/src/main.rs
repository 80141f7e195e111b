//! `telemeterd` - telemetry logger daemon and tools
//!
//! `run` starts the logger; the other commands inspect the storage card and
//! the configuration from a workstation.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;

use telemeter::board::{self, Peripherals};
use telemeter::cli::{Cli, Command, ConfigCommand, DecodeCommand, FilesCommand, OutputFormat, RunCommand};
use telemeter::protocol::LineRecord;
use telemeter::storage::{dump_tree, list_dir};
use telemeter::{halt, init_logging, Clock, Config, Logger, MonotonicClock, Runtime};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    // `config validate --file` checks a file other than the active one.
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        return handle_validate(file.clone().or_else(|| cli.config.clone()));
    }

    let config = Config::load_from(cli.config.clone()).context("could not load configuration")?;

    match cli.command {
        Command::Run(run) => handle_run(&config, &run),
        Command::Files(files) => handle_files(&config, &files),
        Command::Decode(decode) => handle_decode(&config, &decode),
        Command::Config(config_cmd) => handle_config(&config, &config_cmd),
    }
}

fn handle_run(config: &Config, cmd: &RunCommand) -> Result<()> {
    let clock: Rc<dyn Clock> = Rc::new(MonotonicClock::start());
    let mut logger = Logger::stdout(Rc::clone(&clock));

    if let Some(path) = &config.board.serial_path {
        match board::open_serial(path) {
            Ok(port) => logger = logger.with_serial(Box::new(port)),
            Err(err) => logger.console(&format!("Could not initialize serial port: {err}")),
        }
    }

    logger.info(format!("Starting telemeter on {}", board::platform_name()));

    let peripherals = match Peripherals::from_config(config) {
        Ok(peripherals) => peripherals,
        Err(err) => {
            logger.report("Could not set up peripherals", &err);
            if cmd.exit_on_fatal {
                return Err(err).context("fatal startup error");
            }
            halt(&logger);
        }
    };

    let mut runtime = Runtime::new(peripherals, config, logger, clock);
    match runtime.run() {
        Ok(never) => match never {},
        Err(err) => {
            if cmd.exit_on_fatal {
                return Err(err).context("fatal startup error");
            }
            halt(runtime.logger());
        }
    }
}

fn handle_files(config: &Config, cmd: &FilesCommand) -> Result<()> {
    let dir = cmd.dir.clone().unwrap_or_else(|| config.storage.root.clone());

    if cmd.json {
        let entries = list_dir(&dir)?;
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let lines = dump_tree(&dir)?;
    if lines.is_empty() {
        println!("No files to list in {}.", dir.display());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn handle_decode(config: &Config, cmd: &DecodeCommand) -> Result<()> {
    let path = cmd
        .file
        .clone()
        .unwrap_or_else(|| config.storage.root.join(&config.storage.data_file));
    let contents =
        fs::read_to_string(&path).with_context(|| format!("could not read {}", path.display()))?;

    let mut rejected = 0usize;
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = match LineRecord::parse(line) {
            Ok(record) => record,
            Err(err) => {
                eprintln!("{}:{}: {err}", path.display(), index + 1);
                rejected += 1;
                continue;
            }
        };
        match cmd.format {
            OutputFormat::Plain => {
                let fields: Vec<String> = record
                    .fields
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                println!(
                    "{:>12}  {:<8} {}",
                    record.timestamp_ms,
                    record.measurement,
                    fields.join(" ")
                );
            }
            OutputFormat::Json => println!("{}", serde_json::to_string(&record)?),
            OutputFormat::Line => println!("{}", record.to_line()),
        }
    }

    if rejected > 0 {
        eprintln!("{rejected} line(s) could not be decoded");
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: &ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Root:               {}", config.storage.root.display());
                println!("  Data file:          {}", config.storage.data_file);
                println!("  Run log:            {}", config.storage.run_log);
                println!("  Error log:          {}", config.storage.error_log);
                println!();
                println!("[Network]");
                println!("  SSID:               {}", config.network.ssid);
                println!(
                    "  Listen:             {}:{}",
                    config.network.address, config.network.port
                );
                println!("  Files prefix:       {}", config.network.files_prefix);
                println!("  Chunk size:         {}", config.network.chunk_size);
                println!();
                println!("[Board]");
                println!("  Backend:            {:?}", config.board.kind);
                println!("  Delete trigger:     {}", config.board.delete_trigger);
                println!();
                println!("[Runtime]");
                println!("  Tick pause (ms):    {}", config.runtime.tick_pause_ms);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            return handle_validate(file.clone());
        }
    }
    Ok(())
}

fn handle_validate(file: Option<PathBuf>) -> Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path)) {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => println!("Configuration error: {e}"),
    }
    Ok(())
}
