use clap::{Arg, ArgAction, Command};

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_name("PATH")
        .help("Path to the presence configuration JSON")
}

pub fn build() -> Command {
    Command::new("presenced")
        .about("Live-presence authorization and process guardian")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .value_name("FILTER")
                .help("Log filter used when RUST_LOG is unset"),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate an Ed25519 authority signing key")
                .arg(
                    Arg::new("out")
                        .long("out")
                        .required(true)
                        .value_name("PATH")
                        .help("Where to write the hex signing key"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing key file"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a configuration file")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("authorize")
                .about("Validate a four-layer signature and issue an authorization token")
                .arg(config_arg())
                .arg(
                    Arg::new("subject")
                        .long("subject")
                        .required(true)
                        .value_name("ID")
                        .help("Subject the token is issued to"),
                )
                .arg(
                    Arg::new("signature")
                        .long("signature")
                        .required(true)
                        .value_name("PATH")
                        .help("FourLayerSignature JSON file"),
                )
                .arg(
                    Arg::new("binding")
                        .long("binding")
                        .required(true)
                        .value_name("PATH")
                        .help("DeviceBindingRecord JSON file"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_name("PATH")
                        .help("Token destination (default: the configured shutdown token path)"),
                ),
        )
        .subcommand(
            Command::new("restore")
                .about("Queue a full presence re-validation that clears stasis on the next signal")
                .arg(config_arg())
                .arg(
                    Arg::new("signature")
                        .long("signature")
                        .required(true)
                        .value_name("PATH")
                        .help("FourLayerSignature JSON file"),
                )
                .arg(
                    Arg::new("binding")
                        .long("binding")
                        .required(true)
                        .value_name("PATH")
                        .help("DeviceBindingRecord JSON file"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run the process guardian until an authorized shutdown")
                .arg(config_arg())
                .arg(
                    Arg::new("no-session-lock")
                        .long("no-session-lock")
                        .action(ArgAction::SetTrue)
                        .help("Log lockdowns instead of locking the interactive session"),
                ),
        )
}
