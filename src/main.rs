use anyhow::{anyhow, bail, Result};
use riskpanel::dashboard::Dashboard;
use riskpanel::data::{load_panel, LoadError};
use riskpanel::logging::{log_config, params_hash, ProfileScope};
use riskpanel::panel::filter_providers;
use riskpanel::state::{Config, Event};
use riskpanel::views::{provider_view, stability_view, top_risk_board};
use std::io::{self, BufRead, Write};

const USAGE: &str = "usage: riskpanel [--json] [--data PATH] [--url URL] <command>

commands:
  dashboard          full render (honours --url pre-selection)
  rank               providers by latest risk score
  search <query>     filtered provider options
  view <pid>         provider detail view
  stability <pid>    volatility summary
  top [n]            top risk providers
  click <row>        select a leaderboard row
  session            read events from stdin (search/select/click/url/quit)";

struct Args {
    json: bool,
    data: Option<String>,
    url: Option<String>,
    command: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        json: false,
        data: None,
        url: None,
        command: Vec::new(),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--json" => args.json = true,
            "--data" => args.data = Some(it.next().ok_or_else(|| anyhow!("--data needs a path"))?),
            "--url" => args.url = Some(it.next().ok_or_else(|| anyhow!("--url needs a value"))?),
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => args.command.push(arg),
        }
    }
    Ok(args)
}

fn emit<T: serde::Serialize>(json: bool, value: &T, markdown: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", markdown());
    }
    Ok(())
}

fn arg<'a>(command: &'a [String], idx: usize, what: &str) -> Result<&'a str> {
    command
        .get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing {}\n\n{}", what, USAGE))
}

fn parse_session_line(line: &str) -> Option<Result<Event>> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim().to_string();
    match verb {
        "" | "quit" | "exit" => None,
        "search" => Some(Ok(Event::SearchChanged(rest))),
        "select" => Some(Ok(Event::ProviderSelected(rest))),
        "url" => Some(Ok(Event::UrlLoaded(rest))),
        "click" => Some(
            rest.parse()
                .map(Event::BoardRowClicked)
                .map_err(|e| anyhow!("bad row {:?}: {}", rest, e)),
        ),
        other => Some(Err(anyhow!("unknown event {:?}", other))),
    }
}

fn run_session(dash: &mut Dashboard, json: bool) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_session_line(&line) {
            None => break,
            Some(Err(err)) => eprintln!("{}", err),
            Some(Ok(event)) => {
                dash.handle(event);
                emit(json, &dash.snapshot(), || dash.render_markdown())?;
                stdout.flush()?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let mut cfg = Config::from_env();
    if let Some(path) = &args.data {
        cfg.candidate_paths = vec![path.clone()];
    }
    log_config(
        &params_hash(&format!("{:?}", cfg)),
        cfg.candidate_paths.len(),
        cfg.remote_url.is_some(),
    );

    let Some(command) = args.command.first().map(String::as_str) else {
        bail!("{}", USAGE);
    };

    let loaded = {
        let _scope = ProfileScope::new("load_panel");
        load_panel(&cfg).await
    };
    let loaded = match loaded {
        Ok(loaded) => loaded,
        Err(err @ LoadError::DataUnavailable { .. }) => {
            eprintln!("Data not found: {}", err);
            std::process::exit(2);
        }
        Err(err) => return Err(err.into()),
    };
    let panel = loaded.panel;

    match command {
        "rank" => {
            let ranked = panel.rank_providers();
            emit(args.json, &ranked, || {
                ranked
                    .iter()
                    .map(|r| format!("{}\t{:.4}\t{}\n", r.provider_id, r.latest_score, r.latest_date))
                    .collect()
            })?;
        }
        "search" => {
            let query = args.command.get(1).map(String::as_str).unwrap_or("");
            let ids: Vec<String> = panel.rank_providers().into_iter().map(|r| r.provider_id).collect();
            let options = filter_providers(&ids, query);
            emit(args.json, &options, || options.iter().map(|o| format!("{}\n", o)).collect())?;
        }
        "view" => {
            let outcome = provider_view(&panel, arg(&args.command, 1, "provider id")?, cfg.anomaly_hours);
            emit(args.json, &outcome, || outcome.to_markdown())?;
        }
        "stability" => {
            let outcome = stability_view(&panel, arg(&args.command, 1, "provider id")?);
            emit(args.json, &outcome, || outcome.to_markdown())?;
        }
        "top" => {
            let n = match args.command.get(1) {
                Some(n) => n.parse().map_err(|e| anyhow!("bad count {:?}: {}", n, e))?,
                None => cfg.top_n,
            };
            let board = top_risk_board(&panel, n);
            emit(args.json, &board, || board.to_markdown())?;
        }
        "click" => {
            let row: usize = arg(&args.command, 1, "row index")?
                .parse()
                .map_err(|e| anyhow!("bad row: {}", e))?;
            let mut dash = Dashboard::new(panel, cfg);
            dash.handle(Event::BoardRowClicked(row));
            emit(args.json, &dash.snapshot(), || dash.render_markdown())?;
        }
        "dashboard" | "session" => {
            let mut dash = Dashboard::new(panel, cfg);
            if let Some(url) = &args.url {
                dash.handle(Event::UrlLoaded(url.clone()));
            }
            emit(args.json, &dash.snapshot(), || dash.render_markdown())?;
            if command == "session" {
                run_session(&mut dash, args.json)?;
            }
        }
        other => bail!("unknown command {:?}\n\n{}", other, USAGE),
    }
    Ok(())
}
