//! Read-only queries against the contract database

use std::collections::HashMap;

use indoc::indoc;
use json::{object, JsonValue};

use contract_sync::{
    keys::SigningKey,
    primitives::ContractRecord,
    store::{ContractDb, SledStore},
};

/// A command run from the command line against an open database
pub trait Command {
    /// Full usage text
    fn help(&self) -> &'static str;

    /// One line summary for the command list
    fn short_help(&self) -> &'static str;

    /// Runs the command, returning the json response
    fn exec(&self, args: &[&str], db: &ContractDb<SledStore>) -> String;
}

/// A command that does not need the database
pub trait ShortCircuitedCommand {
    /// Runs the command without opening the database
    fn exec_without_db(args: Vec<String>) -> String;
}

fn error_json(message: impl std::fmt::Display) -> String {
    object! { "error" => message.to_string() }.pretty(2)
}

fn record_json(record: &ContractRecord) -> JsonValue {
    let extensions = json::parse(&record.extensions().to_string()).unwrap_or(JsonValue::Null);
    object! {
        "contract_id" => record.contract_id().as_str(),
        "number" => record.number(),
        "bytecode" => record.bytecode().to_string(),
        "extensions" => extensions,
        "block" => object! {
            "id" => record.block().id.to_string(),
            "height" => record.block().height,
        },
        "transaction" => object! {
            "id" => record.transaction().id.to_string(),
            "signer" => record.transaction().signer.as_str(),
        },
    }
}

struct StatusCommand {}
impl Command for StatusCommand {
    fn help(&self) -> &'static str {
        indoc! {r#"
            Show the height of the last finalized block and the number of recorded contracts
            Usage:
            status

        "#}
    }

    fn short_help(&self) -> &'static str {
        "Show block height and total contracts"
    }

    fn exec(&self, _args: &[&str], db: &ContractDb<SledStore>) -> String {
        object! {
            "block_height" => db.block_height(),
            "total_contracts" => db.total_contracts(),
        }
        .pretty(2)
    }
}

struct ContractCommand {}
impl Command for ContractCommand {
    fn help(&self) -> &'static str {
        indoc! {r#"
            Show the latest record of a contract
            Usage:
            contract <contract_id>

            Example:
            contract 1NsQbH5AhQXgtSNg1ejpFqTi2hmCWz1eQS

        "#}
    }

    fn short_help(&self) -> &'static str {
        "Show a contract by id"
    }

    fn exec(&self, args: &[&str], db: &ContractDb<SledStore>) -> String {
        if args.len() != 1 {
            return format!("Error: {}\n{}", "expected one contract id", self.help());
        }
        match db.get_contract_by_id(args[0]) {
            Ok(Some(record)) => record_json(&record).pretty(2),
            Ok(None) => error_json(format!("Contract {} not found", args[0])),
            Err(e) => error_json(e),
        }
    }
}

struct ContractNumberCommand {}
impl Command for ContractNumberCommand {
    fn help(&self) -> &'static str {
        indoc! {r#"
            Show the contract recorded at a position, counting from 0 in finalization order
            Usage:
            contractnumber <number>

            Example:
            contractnumber 0

        "#}
    }

    fn short_help(&self) -> &'static str {
        "Show a contract by its number"
    }

    fn exec(&self, args: &[&str], db: &ContractDb<SledStore>) -> String {
        if args.len() != 1 {
            return format!("Error: {}\n{}", "expected one number", self.help());
        }
        let number = match args[0].parse::<u64>() {
            Ok(number) => number,
            Err(e) => return error_json(format!("Couldn't parse {}: {}", args[0], e)),
        };
        match db.get_contract_by_number(number) {
            Ok(record) => record_json(&record).pretty(2),
            Err(e) => error_json(e),
        }
    }
}

/// Derives the address of a key
pub struct AddressCommand {}
impl Command for AddressCommand {
    fn help(&self) -> &'static str {
        indoc! {r#"
            Show the address and WIF of a secret key
            Usage:
            address <wif>
            address <seed phrase words..>

            A single argument that decodes as a WIF is taken as one, anything else is hashed as a
            seed phrase.
        "#}
    }

    fn short_help(&self) -> &'static str {
        "Derive the address of a WIF or seed phrase"
    }

    fn exec(&self, args: &[&str], _db: &ContractDb<SledStore>) -> String {
        Self::exec_without_db(args.iter().map(|s| s.to_string()).collect())
    }
}

impl ShortCircuitedCommand for AddressCommand {
    fn exec_without_db(args: Vec<String>) -> String {
        if args.is_empty() {
            return AddressCommand {}.help().to_string();
        }
        let key = match args.as_slice() {
            [wif] => SigningKey::from_wif(wif).or_else(|_| SigningKey::from_seed_phrase(wif)),
            words => SigningKey::from_seed_phrase(&words.join(" ")),
        };
        match key {
            Ok(key) => object! {
                "address" => key.address(),
                "wif" => key.to_wif(),
            }
            .pretty(2),
            Err(e) => error_json(e),
        }
    }
}

/// Lists commands, or shows the usage of one
pub struct HelpCommand {}
impl Command for HelpCommand {
    fn help(&self) -> &'static str {
        indoc! {r#"
            List all available commands
            Usage:
            help [command_name]

            If no "command_name" is specified, a list of all available commands is returned
            Example:
            help contract

        "#}
    }

    fn short_help(&self) -> &'static str {
        "Lists all available commands"
    }

    fn exec(&self, args: &[&str], _db: &ContractDb<SledStore>) -> String {
        Self::exec_without_db(args.iter().map(|s| s.to_string()).collect())
    }
}

impl ShortCircuitedCommand for HelpCommand {
    fn exec_without_db(args: Vec<String>) -> String {
        match args.len() {
            0 => {
                let mut responses: Vec<String> = get_commands()
                    .iter()
                    .map(|(cmd, obj)| format!("{} - {}", cmd, obj.short_help()))
                    .collect();
                responses.sort();
                responses.insert(0, "Available commands:".to_string());
                responses.join("\n")
            }
            1 => match get_commands().get(args[0].as_str()) {
                Some(cmd) => cmd.help().to_string(),
                None => format!("Command {} not found", args[0]),
            },
            _ => HelpCommand {}.help().to_string(),
        }
    }
}

/// Every command by name
pub fn get_commands() -> HashMap<&'static str, Box<dyn Command>> {
    let entries: Vec<(&'static str, Box<dyn Command>)> = vec![
        ("help", Box::new(HelpCommand {})),
        ("status", Box::new(StatusCommand {})),
        ("contract", Box::new(ContractCommand {})),
        ("contractnumber", Box::new(ContractNumberCommand {})),
        ("address", Box::new(AddressCommand {})),
    ];

    entries.into_iter().collect()
}

/// Runs `cmd` against `db`
pub fn do_user_command(cmd: &str, args: &[&str], db: &ContractDb<SledStore>) -> String {
    match get_commands().get(cmd.to_ascii_lowercase().as_str()) {
        Some(cmd) => cmd.exec(args, db),
        None => format!(
            "Unknown command : {}. Type 'help' for a list of commands",
            cmd
        ),
    }
}
