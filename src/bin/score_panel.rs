use anyhow::{Context, Result};
use riskpanel::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use riskpanel::scoring::{score_csv, Weights};
use serde_json::json;
use std::env;
use std::fs::File;
use std::io::BufWriter;

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let (Some(input), Some(output)) = (args.next(), args.next()) else {
        eprintln!("usage: score_panel <raw_panel.csv> <scored_panel.csv>");
        std::process::exit(1);
    };

    let _scope = ProfileScope::with_context("score_panel", &[("input", v_str(&input))]);
    let reader = File::open(&input).with_context(|| format!("opening {}", input))?;
    let writer = BufWriter::new(File::create(&output).with_context(|| format!("creating {}", output))?);
    let rows = score_csv(reader, writer, &Weights::default())?;

    log(
        Level::Info,
        Domain::Panel,
        "scored",
        obj(&[
            ("source", v_str(&input)),
            ("output", v_str(&output)),
            ("rows", json!(rows)),
        ]),
    );
    Ok(())
}
