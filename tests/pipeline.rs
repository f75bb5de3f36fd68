use spin2c::{
    ast::{
        self, ConstantDecl, DataLine, DebugArg, DebugFormat, Expr, LocalDecl, MethodDecl, Node, ObjectDecl, Operand,
        Prefix, Statement,
    },
    bytecode::Op,
    clock::{self, ClockRequest, Source},
    compile::{Compilation, CompileOptions, Compiler, Config},
    error::Diagnostic,
    expr::{BinaryOp, Number},
    link::{ExportedMethod, MapLoader, MapResolver, ObjectImage},
    source::{Located, Location},
};

fn at<T>(value: T) -> Located<T> {
    Located::at(value, Location::default())
}

fn long(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn method(public: bool, name: &str, locals: &[&str], body: Vec<Statement>) -> Node {
    Node::Method(at(MethodDecl {
        public,
        name: at(name.into()),
        parameters: vec![],
        results: vec![],
        locals: locals
            .iter()
            .map(|&name| LocalDecl {
                kind: ast::DataType::Long,
                name: at(name.into()),
                count: None,
            })
            .collect(),
        body: body.into_iter().map(at).collect(),
    }))
}

fn line(label: Option<&str>, mnemonic: &str, operands: Vec<Operand>) -> Located<DataLine> {
    at(DataLine {
        label: label.map(|label| at(label.into())),
        mnemonic: Some(at(mnemonic.into())),
        operands: operands.into_iter().map(at).collect(),
        ..Default::default()
    })
}

fn compile_with(nodes: Vec<Node>, resolver: &MapResolver, options: CompileOptions) -> Compilation {
    let loader = MapLoader::new();
    let object = ast::Object {
        name: "top".to_string(),
        nodes,
    };

    let config = Config {
        options,
        ..Default::default()
    };

    Compiler::new(resolver, &loader, config).compile(&object)
}

fn compile(nodes: Vec<Node>) -> Compilation {
    compile_with(nodes, &MapResolver::new(), CompileOptions::empty())
}

#[test]
fn crystal_pll_reaches_target_within_tolerance() {
    let setting = clock::derive(&ClockRequest {
        source: Source::Crystal(20_000_000),
        frequency: Some(160_000_000),
        tolerance: clock::DEFAULT_ERROR,
    })
    .unwrap();

    assert!((setting.frequency as i64 - 160_000_000).abs() <= clock::DEFAULT_ERROR as i64);
    assert_eq!(setting.mode & 0b11, 0b11);
    assert_eq!(setting.mode >> 2 & 0b11, 0b10);
}

#[test]
fn child_methods_use_link_position() {
    let child = ObjectImage {
        bytes: vec![0xAA; 4],
        var_size: 8,
        methods: vec![ExportedMethod {
            name: "foo".into(),
            parameters: 1,
            returns: 0,
            index: 0,
        }],
        ..Default::default()
    };

    let mut resolver = MapResolver::new();
    resolver.insert("a.spin2", child.clone());
    resolver.insert("b.spin2", child);

    let objects = Node::Objects(vec![
        at(ObjectDecl {
            name: at("a".into()),
            path: at("a.spin2".to_string()),
            count: Some(at(Expr::number(2))),
        }),
        at(ObjectDecl {
            name: at("obj".into()),
            path: at("b.spin2".to_string()),
            count: None,
        }),
    ]);

    let call = Statement::Expression(at(Expr::Call {
        object: Some(at("obj".into())),
        index: None,
        method: at("foo".into()),
        args: vec![at(Expr::number(7))],
    }));

    let compilation = compile_with(
        vec![objects, method(true, "main", &[], vec![call])],
        &resolver,
        CompileOptions::empty(),
    );

    assert!(compilation.succeeded(), "{}", compilation.diagnostics);
    let image = compilation.image.unwrap();
    let bytes = &image.bytes;

    // Tres registros de enlace, una entrada y el centinela
    assert_eq!(long(bytes, 24), 0x8000_0000 | 32);
    assert_eq!(
        &bytes[32..38],
        &[Op::Anchor as u8, 0xA8, Op::CallObjSub as u8, 2, 0, Op::ReturnResults as u8]
    );

    // Las instancias de `a` comparten imagen; `obj` sigue
    assert_eq!((long(bytes, 0), long(bytes, 4)), (40, 0));
    assert_eq!((long(bytes, 8), long(bytes, 12)), (40, 8));
    assert_eq!((long(bytes, 16), long(bytes, 20)), (44, 16));
    assert_eq!(image.var_size, 24);
    assert_eq!(bytes.len(), 48);
}

#[test]
fn missing_member_object_is_reported() {
    let call = Statement::Expression(at(Expr::Call {
        object: Some(at("nothing".into())),
        index: None,
        method: at("start".into()),
        args: vec![],
    }));

    let compilation = compile(vec![method(true, "main", &[], vec![call])]);
    assert_eq!(
        compilation.diagnostics.errors().next().map(Diagnostic::message),
        Some("`nothing` is not an object")
    );
}

#[test]
fn long_literals_add_an_augment_prefix() {
    let dat = Node::Data(vec![
        line(None, "org", vec![]),
        line(
            None,
            "mov",
            vec![
                Operand::new(Prefix::None, at(Expr::id("outa"))),
                Operand::new(Prefix::LongLiteral, at(Expr::number(0x12345))),
            ],
        ),
        line(
            None,
            "mov",
            vec![
                Operand::new(Prefix::None, at(Expr::id("outa"))),
                Operand::new(Prefix::Immediate, at(Expr::number(5))),
            ],
        ),
    ]);

    let compilation = compile(vec![dat]);
    assert!(compilation.succeeded(), "{}", compilation.diagnostics);

    let bytes = compilation.image.unwrap().bytes;
    assert_eq!(bytes.len(), 4 + 8 + 4);
    assert_eq!(long(&bytes, 4) >> 23, 0x1FE);
    assert_eq!(long(&bytes, 4) & 0x7F_FFFF, 0x12345 >> 9);
    assert_eq!(long(&bytes, 8) & 0x1FF, 0x12345 & 0x1FF);
}

#[test]
fn unused_private_methods_are_removed() {
    let nodes = || {
        vec![
            method(true, "main", &[], vec![]),
            method(false, "helper", &[], vec![]),
        ]
    };

    let kept = compile(nodes()).image.unwrap();
    assert_eq!(long(&kept.bytes, 8), 0);

    let options = CompileOptions::REMOVE_UNUSED_METHODS | CompileOptions::WARN_UNUSED;
    let compilation = compile_with(nodes(), &MapResolver::new(), options);
    let removed = compilation.image.as_ref().unwrap();

    assert_eq!(removed.bytes, vec![0x08, 0, 0, 0x80, 0, 0, 0, 0, Op::ReturnResults as u8]);
    assert_eq!(
        compilation.diagnostics.warnings().next().map(Diagnostic::message),
        Some("Method `helper` is never used")
    );
}

#[test]
fn methods_read_dat_labels() {
    let dat = Node::Data(vec![line(
        Some("table"),
        "word",
        vec![Operand::new(Prefix::None, at(Expr::number(0x1234)))],
    )]);

    let body = vec![Statement::Assign {
        target: at(Expr::id("x")),
        op: None,
        value: at(Expr::id("table")),
    }];

    let compilation = compile(vec![method(true, "main", &["x"], body), dat]);
    assert!(compilation.succeeded(), "{}", compilation.diagnostics);

    let bytes = compilation.image.unwrap().bytes;

    // Tabla en 8, método en 10: setup de word en PBASE con desplazamiento 8
    assert_eq!(long(&bytes, 0), 0x8000_0000 | 10);
    assert_eq!(&bytes[8..10], &[0x34, 0x12]);
    assert_eq!(&bytes[10..13], &[0x4A + 1, 8, Op::Read as u8]);
    assert_eq!(bytes[13], 0xE0);
}

#[test]
fn inline_assembly_binds_locals_to_registers() {
    let add = line(
        None,
        "add",
        vec![
            Operand::new(Prefix::None, at(Expr::id("x"))),
            Operand::new(Prefix::Immediate, at(Expr::number(1))),
        ],
    );

    let body = vec![Statement::InlineAsm(vec![line(None, "org", vec![]), add])];
    let compilation = compile(vec![method(true, "main", &["x"], body)]);
    assert!(compilation.succeeded(), "{}", compilation.diagnostics);

    let bytes = compilation.image.unwrap().bytes;
    let code = &bytes[8..];

    // Origen 0, dos longs (ADD y el RET automático)
    assert_eq!(&code[..3], &[Op::Inline as u8, 0, 1]);
    assert_eq!(long(code, 3), 0xF104_0000 | 0x1E0 << 9 | 1);
    assert_eq!(long(code, 7) >> 28, 0xF);
}

#[test]
fn debug_statements_need_the_option() {
    let body = || {
        vec![Statement::Debug(vec![
            DebugArg::Text("x".to_string()),
            DebugArg::Value {
                format: DebugFormat::Udec,
                expr: at(Expr::number(3)),
                name: "3".to_string(),
            },
        ])]
    };

    let plain = compile(vec![method(true, "main", &[], body())]);
    assert!(plain.debug.is_none());
    assert_eq!(&plain.image.unwrap().bytes[8..], &[Op::ReturnResults as u8]);

    let debug = compile_with(vec![method(true, "main", &[], body())], &MapResolver::new(), CompileOptions::DEBUG);
    let data = debug.debug.unwrap();
    assert_eq!(&data[..2], &[1, 0]);
    assert_eq!(
        &debug.image.unwrap().bytes[8..],
        &[0xA4, Op::Debug as u8, 1, 0, Op::ReturnResults as u8]
    );
}

#[test]
fn repeat_range_keeps_four_longs_on_the_stack() {
    let body = vec![Statement::RepeatRange {
        variable: at(Expr::id("i")),
        from: at(Expr::number(1)),
        to: at(Expr::number(3)),
        step: None,
        body: vec![at(Statement::Break)],
    }];

    let compilation = compile(vec![method(true, "main", &["i"], body)]);
    assert!(compilation.succeeded(), "{}", compilation.diagnostics);

    let code = &compilation.image.unwrap().bytes[8..];
    assert_eq!(&code[..5], &[0xA2, 0xA4, 0xA2, 0xC0, Op::RepeatVarInit as u8]);
    assert_eq!(&code[5..7], &[Op::Pop as u8, 16]);
}

#[test]
fn constants_fold_into_methods() {
    let constants = Node::Constants(vec![at(ConstantDecl::Assign {
        name: at("LIMIT".into()),
        value: at(Expr::Binary(
            Box::new(at(Expr::number(1))),
            BinaryOp::Shl,
            Box::new(at(Expr::number(10))),
        )),
    })]);

    let body = vec![Statement::Assign {
        target: at(Expr::id("x")),
        op: None,
        value: at(Expr::id("LIMIT")),
    }];

    let compilation = compile(vec![constants, method(true, "main", &["x"], body)]);
    let image = compilation.image.unwrap();

    assert_eq!(image.constant(&"limit".into()), Some(Number::Int(1024)));
    assert_eq!(&image.bytes[8..11], &[Op::ConDecod as u8, 10, 0xE0]);
}
