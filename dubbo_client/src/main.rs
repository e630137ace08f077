use std::{env, fs, process};

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use dubbo_client::{InvokeRequest, Opt, XClient};
use dubbo_protocol::{marshal, Error, ErrorKind};

const USAGE: &str = "usage: dubbo-invoke [-c opt.json] <registry-address|service-uri> <interface> <method> [parameter-types] [parameter-values]";

fn parse_args(args: &[String]) -> Result<(Opt, InvokeRequest), Error> {
    let mut args = args.iter();
    let mut positional = Vec::new();
    let mut opt = Opt::default();
    while let Some(arg) = args.next() {
        if arg == "-c" || arg == "--config" {
            let path = args
                .next()
                .ok_or_else(|| Error::new(ErrorKind::ConfigurationError, "-c needs a file"))?;
            let text = fs::read_to_string(path).map_err(|e| {
                Error::new(ErrorKind::ConfigurationError, format!("{}: {}", path, e))
            })?;
            opt = Opt::from_json(&text)?;
        } else {
            positional.push(arg.as_str());
        }
    }
    if positional.len() < 3 || positional.len() > 5 {
        return Err(Error::new(ErrorKind::ConfigurationError, USAGE));
    }

    let target = positional[0];
    let is_registry = target.starts_with("zookeeper://") || target.starts_with("nacos://");
    let req = InvokeRequest {
        registry_address: Some(target.to_owned()).filter(|_| is_registry),
        service_uri: Some(target.to_owned()).filter(|_| !is_registry),
        interface_name: positional[1].to_owned(),
        method_name: positional[2].to_owned(),
        parameter_types: positional.get(3).map(|s| (*s).to_owned()),
        parameter_values: positional.get(4).and_then(|s| marshal::parse_parameter_values(s)),
    };
    Ok((opt, req))
}

#[tokio::main]
pub async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let result = match parse_args(&args) {
        Ok((opt, req)) => XClient::new(opt).invoke(&req).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(v) => println!("{}", pretty(&v)),
        Err(err) => {
            let report = serde_json::to_value(err.report()).unwrap_or(Value::Null);
            println!("{}", pretty(&report));
            process::exit(1);
        }
    }
}

fn pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}
