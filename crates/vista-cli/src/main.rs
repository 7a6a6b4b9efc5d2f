use std::cell::Cell;
use std::io::Write;
use std::process;
use std::rc::Rc;

use vista_client::{ClientConfig, HttpConfig, HttpTransport, ViewClient, ViewQuery, ViewResponse};

const USAGE: &str = "usage: vista <design> <view> [query-string] [--raw] [--spatial] [--post <json>]";

fn parse_args(args: &[String]) -> Result<ViewQuery, String> {
    let mut positional = Vec::new();
    let mut raw = false;
    let mut spatial = false;
    let mut body = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--raw" => raw = true,
            "--spatial" => spatial = true,
            "--post" => body = Some(iter.next().ok_or("--post needs a body")?.clone()),
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            _ => positional.push(arg.clone()),
        }
    }

    let [design, view, rest @ ..] = positional.as_slice() else {
        return Err(USAGE.into());
    };
    let mut query = ViewQuery::new(design.as_str(), view.as_str());
    match rest {
        [] => {}
        [options] => query = query.options(options.as_str()),
        _ => return Err(USAGE.into()),
    }
    if raw {
        query = query.no_parse_rows();
    }
    if spatial {
        query = query.spatial();
    }
    if let Some(body) = body {
        query = query.body(body);
    }
    Ok(query)
}

fn text(bytes: Option<&[u8]>) -> String {
    bytes.map_or_else(|| "null".into(), |b| String::from_utf8_lossy(b).into_owned())
}

fn print_response(resp: &ViewResponse<'_>, failed: &Cell<bool>) {
    if resp.is_final {
        if let Some(meta) = resp.meta {
            eprintln!("{}", String::from_utf8_lossy(meta));
        }
        if let Some(err) = resp.error {
            eprintln!("query failed: {err}");
            failed.set(true);
        }
        return;
    }

    let mut out = std::io::stdout().lock();
    let written = match resp.row {
        Some(row) => writeln!(out, "{}", String::from_utf8_lossy(row)),
        None => writeln!(
            out,
            "{}\t{}\t{}",
            resp.id.unwrap_or("-"),
            text(resp.key),
            text(resp.value)
        ),
    };
    if written.is_err() {
        failed.set(true);
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let query = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(2);
    });

    let config = HttpConfig::from_env();
    tracing::info!("querying {} at {}", query.view, config.base_url);
    let http = Rc::new(HttpTransport::new(config));
    let client = ViewClient::new(http.clone(), ClientConfig::default());

    let failed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&failed);
    if let Err(e) = client.query(&query, move |resp: &ViewResponse<'_>| {
        print_response(resp, &flag)
    }) {
        eprintln!("{e}");
        process::exit(2);
    }

    http.run();
    if failed.get() {
        process::exit(1);
    }
}
