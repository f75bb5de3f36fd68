//! Punto de entrada ("driver").
//!
//! El parser no forma parte de este crate, por lo cual la CLI compila un
//! objeto de demostración construido directamente como árbol: un método
//! que alterna un pin y un bloque `DAT` con el mismo ciclo en PASM2.
//! Sirve para revisar la imagen y los diagnósticos de punta a punta.

use anyhow::{self, bail, Context};
use clap::{self, crate_version, Arg, Command};
use log::LevelFilter;
use spin2c::{
    ast::{self, ConstantDecl, DataLine, Expr, MethodDecl, Node, Operand, Prefix, Statement},
    compile::{CompileOptions, Compiler, Config},
    expr::BinaryOp,
    link::{MapLoader, MapResolver},
    source::{Located, Location},
};

use std::fs;

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("spin2c")
        .version(crate_version!())
        .about("Spin2/PASM2 object compiler")
        .arg(
            Arg::new("output")
                .short('o')
                .takes_value(true)
                .required(true)
                .value_name("FILE")
                .help("Output image"),
        )
        .arg(
            Arg::new("clock")
                .long("clock")
                .takes_value(true)
                .value_name("XIN:CLK")
                .default_value("20000000:200000000")
                .help("Crystal and target frequencies in Hz"),
        )
        .arg(Arg::new("debug").short('g').help("Compile DEBUG() statements"))
        .arg(
            Arg::new("unused")
                .short('u')
                .help("Remove unused methods and variables"),
        )
        .arg(Arg::new("warn").short('W').help("Warn about unused symbols"))
        .arg(Arg::new("verbose").short('v').help("Log compilation phases"))
        .get_matches();

    let level = if args.is_present("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let output = args.value_of("output").context("Missing output file")?;
    if output == "-" {
        bail!("Refusing to write an object image to stdout");
    }

    let clock = args.value_of("clock").context("Missing clock")?;
    let (input, frequency) = parse_clock(clock).with_context(|| format!("Bad clock: {}", clock))?;

    let mut options = CompileOptions::empty();
    if args.is_present("debug") {
        options |= CompileOptions::DEBUG;
    }

    if args.is_present("unused") {
        options |= CompileOptions::REMOVE_UNUSED_METHODS | CompileOptions::REMOVE_UNUSED_VARIABLES;
    }

    if args.is_present("warn") {
        options |= CompileOptions::WARN_UNUSED;
    }

    let config = Config {
        options,
        ..Default::default()
    };

    let resolver = MapResolver::new();
    let loader = MapLoader::new();
    let object = demo_object(input, frequency);

    let compilation = Compiler::new(&resolver, &loader, config).compile(&object);
    if !compilation.diagnostics.is_empty() {
        eprint!("{}", compilation.diagnostics);
    }

    let image = match compilation.image {
        Some(image) => image,
        None => bail!("Compilation of `{}` failed", object.name),
    };

    fs::write(output, &image.bytes).with_context(|| format!("Failed to write image: {}", output))?;
    log::info!(
        "Wrote {} bytes to {}, {} bytes of variables",
        image.bytes.len(),
        output,
        image.var_size
    );

    if let Some(debug) = compilation.debug {
        let path = format!("{}.debug", output);
        fs::write(&path, debug).with_context(|| format!("Failed to write debug data: {}", path))?;
    }

    Ok(())
}

fn parse_clock(text: &str) -> anyhow::Result<(i64, i64)> {
    let (input, frequency) = match text.split_once(':') {
        Some(pair) => pair,
        None => bail!("expected XIN:CLK"),
    };

    Ok((input.trim().parse()?, frequency.trim().parse()?))
}

fn at<T>(value: T) -> Located<T> {
    Located::at(value, Location::new("demo.spin2", 1, 1))
}

fn demo_object(input: i64, frequency: i64) -> ast::Object {
    let constant = |name: &str, value: i64| {
        at(ConstantDecl::Assign {
            name: at(name.into()),
            value: at(Expr::number(value)),
        })
    };

    let pin = Expr::id("PIN");

    // DIRA |= 1 << PIN, luego OUTA ^= 1 << PIN para siempre
    let mask = || {
        at(Expr::Binary(
            Box::new(at(Expr::number(1))),
            BinaryOp::Shl,
            Box::new(at(Expr::id("PIN"))),
        ))
    };

    let blink = MethodDecl {
        public: true,
        name: at("main".into()),
        parameters: vec![],
        results: vec![],
        locals: vec![],
        body: vec![
            at(Statement::Assign {
                target: at(Expr::id("DIRA")),
                op: Some(BinaryOp::Or),
                value: mask(),
            }),
            at(Statement::Repeat {
                count: None,
                body: vec![at(Statement::Assign {
                    target: at(Expr::id("OUTA")),
                    op: Some(BinaryOp::Xor),
                    value: mask(),
                })],
            }),
        ],
    };

    let line = |label: Option<&str>, mnemonic: &str, operands: Vec<Operand>| {
        at(DataLine {
            label: label.map(|label| at(label.into())),
            mnemonic: Some(at(mnemonic.into())),
            operands: operands.into_iter().map(at).collect(),
            ..Default::default()
        })
    };

    let register = |name: &str| Operand::new(Prefix::None, at(Expr::id(name)));
    let immediate = |value: Expr| Operand::new(Prefix::Immediate, at(value));

    let pasm = vec![
        line(None, "org", vec![]),
        line(Some("entry"), "drvh", vec![immediate(pin)]),
        line(Some(".loop"), "drvnot", vec![immediate(Expr::id("PIN"))]),
        line(None, "waitx", vec![immediate(Expr::number(0x1FF))]),
        line(None, "jmp", vec![immediate(Expr::id(".loop"))]),
        line(Some("period"), "long", vec![register("CLKFREQ_")]),
    ];

    ast::Object {
        name: "demo".to_string(),
        nodes: vec![
            Node::Constants(vec![
                constant("_XTLFREQ", input),
                constant("_CLKFREQ", frequency),
                constant("PIN", 56),
            ]),
            Node::Method(at(blink)),
            Node::Data(pasm),
        ],
    }
}
