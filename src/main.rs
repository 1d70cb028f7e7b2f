fn main() {
    if let Err(err) = kavita_update::cli::run() {
        eprintln!("error: {:#}", err);
        let code = err
            .downcast_ref::<kavita_update::UpdateError>()
            .map(|e| e.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
