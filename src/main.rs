use pipesh::{Args, Config, Interpreter, is_exit};

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    let config = Config::from_env().with_args(&args);
    let mut interpreter = Interpreter::new(config);

    let code = match args.command.as_deref() {
        Some(line) if is_exit(line) => 0,
        Some(line) => interpreter.execute_line(line),
        None => interpreter.repl()?,
    };
    std::process::exit(code)
}
