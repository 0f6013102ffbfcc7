//! Command line handling.

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the proxy with the given config file.
    Serve { config_path: String },
    /// Send one request to a policy service and print its answer.
    Query {
        server: String,
        port: u16,
        recipient: String,
        sender: String,
        address: String,
        hostname: String,
    },
}

/// Usage text, `program` being the binary name.
pub fn usage(program: &str) -> String {
    format!(
        "Usage: {program} <config_file>\n       \
         {program} --query [-s|--server host] [-p|--port port] \
         <recipient> <sender> <address> <hostname>"
    )
}

/// Parses the arguments after the program name.
pub fn parse_args<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let first = args.next().ok_or("missing arguments")?;
    if first != "--query" {
        if let Some(extra) = args.next() {
            return Err(format!("unexpected argument {extra:?}"));
        }
        return Ok(Command::Serve { config_path: first });
    }

    let mut server = "localhost".to_string();
    let mut port = 10023;
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-s" | "--server" => server = args.next().ok_or("missing value for --server")?,
            "-p" | "--port" => {
                let value = args.next().ok_or("missing value for --port")?;
                port = value
                    .parse()
                    .map_err(|_| format!("invalid port {value:?}"))?;
            }
            _ => positional.push(arg),
        }
    }

    let [recipient, sender, address, hostname]: [String; 4] = positional
        .try_into()
        .map_err(|p: Vec<String>| format!("expected 4 query arguments, got {}", p.len()))?;
    Ok(Command::Query {
        server,
        port,
        recipient,
        sender,
        address,
        hostname,
    })
}
