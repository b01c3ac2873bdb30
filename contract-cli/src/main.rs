#![forbid(unsafe_code)]
pub fn main() {
    contract_cli::run_cli();
}
