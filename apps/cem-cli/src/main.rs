use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use register_map::{
    self as regmap, ConnectionParams, DataPointKey, RawResponse, Reading, RegisterMap,
    TransportAddress, WriteCommand,
};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    name = "cem",
    version,
    about = "Energy device descriptor tooling",
    disable_help_subcommand = true
)]
struct Cli {
    /// Connection parameter substituted into descriptors (repeatable)
    #[arg(long = "param", short = 'p', value_parser = parse_param, action = ArgAction::Append, global = true)]
    params: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a descriptor file or every descriptor in a directory
    Validate {
        /// YAML descriptor file path
        #[arg(long)]
        file: Option<String>,
        /// Directory containing YAML descriptors
        #[arg(long)]
        dir: Option<String>,
    },
    /// List the data points of a descriptor with their addresses
    Points {
        /// YAML descriptor file path
        #[arg(long)]
        file: String,
    },
    /// Decode a raw register window or JSON body offline
    Decode {
        /// YAML descriptor file path
        #[arg(long)]
        file: String,
        /// Data point as Profile/Point
        #[arg(long)]
        point: String,
        /// Register words, decimal or 0x-hex, most significant first
        #[arg(long, num_args = 1.., conflicts_with = "body")]
        registers: Vec<String>,
        /// JSON response body of a REST endpoint
        #[arg(long)]
        body: Option<String>,
    },
    /// Show the transport write a value turns into
    Encode {
        /// YAML descriptor file path
        #[arg(long)]
        file: String,
        /// Data point as Profile/Point
        #[arg(long)]
        point: String,
        /// Value in the data point's unit
        #[arg(long, allow_hyphen_values = true)]
        value: f64,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let params: ConnectionParams = cli.params.into_iter().collect();

    match cli.command {
        Commands::Validate { file, dir } => validate(file.as_deref(), dir.as_deref(), &params),
        Commands::Points { file } => points(&file, &params),
        Commands::Decode {
            file,
            point,
            registers,
            body,
        } => {
            let map = compile_file(&file, &params)?;
            let key = parse_key(&point)?;
            let reading = decode_point(&map, &key, &registers, body.as_deref())?;
            println!("{key}\t{}\t{}", reading.value, reading.unit);
            Ok(())
        }
        Commands::Encode { file, point, value } => {
            let map = compile_file(&file, &params)?;
            let key = parse_key(&point)?;
            let cmd = regmap::encode_write(&map, &key, value)
                .with_context(|| format!("encoding {value} for {key}"))?;
            print!("{}", describe_write(&cmd));
            Ok(())
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("empty parameter name in {s:?}"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn parse_key(s: &str) -> Result<DataPointKey> {
    DataPointKey::parse(s).ok_or_else(|| anyhow::anyhow!("expected Profile/Point, got {s:?}"))
}

fn parse_register(s: &str) -> Result<u16> {
    let t = s.trim();
    let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => t.parse::<u16>(),
    };
    parsed.with_context(|| format!("invalid register word {s:?}"))
}

fn compile_file(file: &str, params: &ConnectionParams) -> Result<RegisterMap> {
    let text = regmap::load_descriptor_file(file)?;
    let map = regmap::compile(&text, params).with_context(|| format!("compiling {file}"))?;
    debug!(file, name = map.name(), points = map.len(), "descriptor compiled");
    Ok(map)
}

fn validate(file: Option<&str>, dir: Option<&str>, params: &ConnectionParams) -> Result<()> {
    match (file, dir) {
        (Some(f), None) => {
            let map = compile_file(f, params)?;
            println!(
                "ok: {} (interface={}, points={})",
                map.name(),
                map.interface(),
                map.len()
            );
        }
        (None, Some(d)) => {
            let lib = regmap::load_descriptors_dir(d)?;
            let mut names: Vec<&String> = lib.descriptors.keys().collect();
            names.sort();
            let mut failed = 0usize;
            for name in names {
                match lib.compile(name, params) {
                    Ok(map) => println!("ok: {name} (interface={}, points={})", map.interface(), map.len()),
                    Err(e) => {
                        failed += 1;
                        println!("error: {name}: {e}");
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} descriptors failed", lib.descriptors.len());
            }
        }
        _ => {
            return Err(anyhow::anyhow!("provide --file <path> or --dir <dir>"));
        }
    }
    Ok(())
}

fn points(file: &str, params: &ConnectionParams) -> Result<()> {
    let map = compile_file(file, params)?;
    for line in point_lines(&map)? {
        println!("{line}");
    }
    Ok(())
}

fn point_lines(map: &RegisterMap) -> Result<Vec<String>> {
    map.keys()
        .map(|key| {
            let e = map.entry(key)?;
            let addr = match &e.address {
                TransportAddress::Modbus(m) => format!(
                    "register={} wire={} size={} kind={:?} signed={} unit_id={}",
                    m.register, m.wire_address, m.size, m.kind, m.signed, m.unit_id
                ),
                TransportAddress::Rest(r) => format!(
                    "{} {} response={} writable={}",
                    r.method,
                    r.endpoint,
                    r.selector,
                    r.write.is_some()
                ),
            };
            Ok(format!("{key}\t{addr}\tscaling={}\tunit={}", e.scaling, e.unit))
        })
        .collect()
}

fn decode_point(
    map: &RegisterMap,
    key: &DataPointKey,
    registers: &[String],
    body: Option<&str>,
) -> Result<Reading> {
    let reading = match body {
        Some(b) => regmap::decode(map, key, RawResponse::Body(b)),
        None => {
            let words = registers
                .iter()
                .map(|r| parse_register(r))
                .collect::<Result<Vec<u16>>>()?;
            regmap::decode(map, key, RawResponse::Registers(&words))
        }
    };
    reading.with_context(|| format!("decoding {key}"))
}

fn describe_write(cmd: &WriteCommand) -> String {
    match cmd {
        WriteCommand::Registers {
            unit_id,
            address,
            values,
        } => {
            let words: Vec<String> = values.iter().map(|v| format!("0x{v:04X}")).collect();
            format!(
                "modbus write unit_id={unit_id} address={address} values=[{}]\n",
                words.join(", ")
            )
        }
        WriteCommand::Http(req) => {
            let mut out = format!("{} {}\n", req.method, req.url);
            for (k, v) in &req.headers {
                out.push_str(&format!("{k}: {v}\n"));
            }
            if let Some(body) = &req.body {
                out.push('\n');
                out.push_str(body);
                out.push('\n');
            }
            out
        }
    }
}
