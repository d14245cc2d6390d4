//! Top-level definition stream scenarios: value specifications, function
//! and mapping definitions, registers, defaults, records and enums.

mod support;

use pretty_assertions::assert_eq;

use sail_core::ast::*;
use sail_core::check::infer_exp;
use sail_core::env::Env;
use sail_core::reporting::TypeError;
use sail_core::source::Span;
use sail_core::{driver, Options};

use support::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn functions_check_against_their_specification() {
    init_logging();
    let defs = vec![
        spec(
            "incr",
            forall_int(&["n"], Vec::new()),
            fn_typ(
                vec![atom_var("n")],
                Typ::atom(Nexp::sum(Nexp::var(kid("n")), Nexp::constant(1))),
            ),
        ),
        spec(
            "add_int",
            forall_int(&["n", "m"], Vec::new()),
            fn_typ(
                vec![atom_var("n"), atom_var("m")],
                Typ::atom(Nexp::sum(Nexp::var(kid("n")), Nexp::var(kid("m")))),
            ),
        ),
        fundef("incr", pat_id("x"), app("add_int", vec![var("x"), num(1)])),
    ];
    let (checked, env) = driver::check_defs(&prelude(), &defs).unwrap();

    assert_eq!(checked.len(), 3);
    assert!(env.is_defined(&id("incr")));

    // Defining the same function again is an error.
    let again = fundef("incr", pat_id("x"), app("add_int", vec![var("x"), num(1)]));
    assert!(matches!(
        driver::check_defs(&env, &[again]),
        Err(TypeError::Redefinition { .. })
    ));
}

#[test]
fn function_bodies_may_not_exceed_declared_effects() {
    init_logging();
    let defs = vec![
        Def::Register(RegisterDef {
            id: id("R"),
            typ: bits(8),
            init: None,
            span: Span::Empty,
        }),
        spec("peek", TypQuant::empty(), fn_typ(vec![Typ::unit()], bits(8))),
        fundef("peek", pat_id("u"), var("R")),
    ];
    match driver::check_defs(&prelude(), &defs) {
        Err(TypeError::EffectMismatch { inferred, .. }) => {
            assert!(inferred.contains(Effect::ReadReg));
        }
        other => panic!("expected an effect mismatch, got {:?}", other),
    }

    // The declared effect admits the body.
    let defs = vec![
        Def::Register(RegisterDef {
            id: id("R"),
            typ: bits(8),
            init: None,
            span: Span::Empty,
        }),
        spec(
            "peek",
            TypQuant::empty(),
            fn_typ_eff(
                vec![Typ::unit()],
                bits(8),
                EffectSet::single(Effect::ReadReg),
            ),
        ),
        fundef("peek", pat_id("u"), var("R")),
    ];
    assert!(driver::check_defs(&prelude(), &defs).is_ok());

    // Or effect checking is off entirely.
    let mut opts = Options::default();
    opts.no_effects = true;
    let lax = Env::with_options(opts);
    let defs = vec![
        Def::Register(RegisterDef {
            id: id("R"),
            typ: bits(8),
            init: None,
            span: Span::Empty,
        }),
        spec("peek", TypQuant::empty(), fn_typ(vec![Typ::unit()], bits(8))),
        fundef("peek", pat_id("u"), var("R")),
    ];
    assert!(driver::check_defs(&lax, &defs).is_ok());
}

#[test]
fn respecification_requires_structural_equality() {
    init_logging();
    let original = spec("f", TypQuant::empty(), fn_typ(vec![Typ::int()], Typ::bool()));
    let identical = spec("f", TypQuant::empty(), fn_typ(vec![Typ::int()], Typ::bool()));
    let different = spec("f", TypQuant::empty(), fn_typ(vec![Typ::int()], Typ::unit()));

    let (_, env) = driver::check_defs(&prelude(), &[original]).unwrap();
    assert!(driver::check_defs(&env, &[identical]).is_ok());
    assert!(matches!(
        driver::check_defs(&env, &[different]),
        Err(TypeError::Redefinition { .. })
    ));
}

#[test]
fn value_specifications_are_canonicalised() {
    init_logging();
    // A return type with existentials inside a tuple is lifted into one
    // outer existential.
    let packed = Typ::tuple(vec![
        Typ::exist(
            vec![KindedId::int(kid("n"))],
            NConstraint::gteq(Nexp::var(kid("n")), Nexp::constant(0)),
            atom_var("n"),
        ),
        Typ::bool(),
    ]);
    let def = spec("mk", TypQuant::empty(), fn_typ(vec![Typ::unit()], packed));
    let (_, env) = driver::check_defs(&prelude(), &[def]).unwrap();

    let bind = env.get_val_spec(&id("mk")).unwrap();
    match &bind.typ {
        Typ::Fn(_, ret, _) => match ret.as_ref() {
            Typ::Exist(kids, _, body) => {
                assert_eq!(kids.len(), 1);
                assert!(matches!(body.as_ref(), Typ::Tuple(_)));
            }
            typ => panic!("expected a lifted existential, got {}", typ),
        },
        typ => panic!("expected a function type, got {}", typ),
    }

    // An existential in an argument position is a user error.
    let bad = spec(
        "bad",
        TypQuant::empty(),
        fn_typ(
            vec![Typ::exist(
                vec![KindedId::int(kid("n"))],
                NConstraint::True,
                atom_var("n"),
            )],
            Typ::unit(),
        ),
    );
    assert!(driver::check_defs(&prelude(), &[bad]).is_err());
}

#[test]
fn default_order_installs_once() {
    init_logging();
    let env = Env::new();
    let (_, env) = driver::check_defs(&env, &[Def::DefaultOrder(Order::Dec, Span::Empty)]).unwrap();
    // Redeclaring the same order is fine; conflicting is not.
    assert!(driver::check_defs(&env, &[Def::DefaultOrder(Order::Dec, Span::Empty)]).is_ok());
    assert!(driver::check_defs(&env, &[Def::DefaultOrder(Order::Inc, Span::Empty)]).is_err());
}

#[test]
fn configuration_registers_carry_the_config_effect() {
    init_logging();
    let plain = Def::Register(RegisterDef {
        id: id("R"),
        typ: bits(8),
        init: None,
        span: Span::Empty,
    });
    let configured = Def::Register(RegisterDef {
        id: id("CFG"),
        typ: bits(8),
        init: Some(bin_lit("00000000")),
        span: Span::Empty,
    });
    let (checked, env) = driver::check_defs(&prelude(), &[plain, configured]).unwrap();

    assert!(checked[0].annot.is_none());
    let annot = checked[1].annot.as_ref().expect("config register is annotated");
    assert!(annot.effect.contains(Effect::Config));
    assert!(env.get_register(&id("CFG")).is_some());
}

#[test]
fn top_level_lets_must_be_pure() {
    init_logging();
    let reg = Def::Register(RegisterDef {
        id: id("R"),
        typ: bits(8),
        init: None,
        span: Span::Empty,
    });
    let (_, env) = driver::check_defs(&prelude(), &[reg]).unwrap();

    let pure_let = Def::Let(pat_id("x"), num(5));
    let (_, env_after) = driver::check_defs(&env, &[pure_let]).unwrap();
    let (_, typ) = env_after.get_local(&id("x")).unwrap();
    assert_eq!(typ, atom(5));

    let impure_let = Def::Let(pat_id("y"), var("R"));
    assert!(matches!(
        driver::check_defs(&env, &[impure_let]),
        Err(TypeError::EffectMismatch { .. })
    ));
}

#[test]
fn mapping_definitions_check_clauses_both_ways() {
    init_logging();
    let mapping_spec = Def::Spec(ValSpec {
        id: id("flag"),
        quant: TypQuant::empty(),
        typ: Typ::Bidir(Box::new(bits(1)), Box::new(Typ::bool())),
        is_cast: false,
        span: Span::Empty,
    });
    let mapping = Def::Mapping(MapDef {
        id: id("flag"),
        clauses: vec![
            MapClause::Bidir(
                pat(PatKind::Lit(Lit::Bin("1".to_owned()))),
                pat(PatKind::Lit(Lit::True)),
                Span::Empty,
            ),
            MapClause::Bidir(
                pat(PatKind::Lit(Lit::Bin("0".to_owned()))),
                pat(PatKind::Lit(Lit::False)),
                Span::Empty,
            ),
            // A one-directional clause only checks its own direction.
            MapClause::Forwards(pat(PatKind::Wild), bool_lit(false), Span::Empty),
        ],
        span: Span::Empty,
    });
    let (_, env) = driver::check_defs(&prelude(), &[mapping_spec, mapping]).unwrap();
    assert!(env.is_defined(&id("flag")));

    // The synthesised directions are ordinary functions.
    let forwards = infer_exp(&env, &app("flag_forwards", vec![bin_lit("1")])).unwrap();
    assert_eq!(typ_of(&forwards), Typ::bool());
    assert_eq!(forwards.effect(), EffectSet::single(Effect::Escape));

    // A mapping expression dispatches by direction.
    let via_mapping = infer_exp(&env, &app("flag", vec![bool_lit(true)])).unwrap();
    assert_eq!(typ_of(&via_mapping), bits(1));
}

#[test]
fn bidirectional_clauses_must_bind_the_same_variables() {
    init_logging();
    let mapping_spec = Def::Spec(ValSpec {
        id: id("flag"),
        quant: TypQuant::empty(),
        typ: Typ::Bidir(Box::new(bits(1)), Box::new(Typ::bool())),
        is_cast: false,
        span: Span::Empty,
    });
    let lopsided = Def::Mapping(MapDef {
        id: id("flag"),
        clauses: vec![MapClause::Bidir(
            pat_id("b"),
            pat(PatKind::Lit(Lit::True)),
            Span::Empty,
        )],
        span: Span::Empty,
    });
    assert!(driver::check_defs(&prelude(), &[mapping_spec, lopsided]).is_err());
}

#[test]
fn string_mappings_synthesise_a_prefix_matcher() {
    init_logging();
    let mapping_spec = Def::Spec(ValSpec {
        id: id("reg_name"),
        quant: TypQuant::empty(),
        typ: Typ::Bidir(Box::new(bits(1)), Box::new(Typ::string())),
        is_cast: false,
        span: Span::Empty,
    });
    let (_, env) = driver::check_defs(&prelude(), &[mapping_spec]).unwrap();

    let matcher = env.get_val_spec(&id("reg_name_matches_prefix")).unwrap();
    match &matcher.typ {
        Typ::Fn(args, ret, _) => {
            assert_eq!(args, &vec![Typ::string()]);
            assert_eq!(
                ret.as_ref(),
                &Typ::option(Typ::tuple(vec![bits(1), Typ::nat()]))
            );
        }
        typ => panic!("expected a function type, got {}", typ),
    }
}

#[test]
fn enums_and_their_members() {
    init_logging();
    let defs = vec![Def::Type(TypeDef::Enum {
        id: id("Permission"),
        members: vec![id("Read"), id("Write")],
        span: Span::Empty,
    })];
    let (_, env) = driver::check_defs(&prelude(), &defs).unwrap();

    let member = infer_exp(&env, &var("Read")).unwrap();
    assert_eq!(typ_of(&member), Typ::id("Permission"));

    // Members cannot be claimed by a second enumeration.
    let clash = Def::Type(TypeDef::Enum {
        id: id("Other"),
        members: vec![id("Read")],
        span: Span::Empty,
    });
    assert!(matches!(
        driver::check_defs(&env, &[clash]),
        Err(TypeError::Redefinition { .. })
    ));
}

#[test]
fn records_expose_field_accessors_and_updates() {
    init_logging();
    let defs = vec![
        Def::Type(TypeDef::Record {
            id: id("Cpu"),
            quant: TypQuant::empty(),
            fields: vec![(bits(8), id("pc")), (Typ::bool(), id("halted"))],
            span: Span::Empty,
        }),
        spec("mk_cpu", TypQuant::empty(), fn_typ(vec![Typ::unit()], Typ::id("Cpu"))),
    ];
    let (_, env) = driver::check_defs(&prelude(), &defs).unwrap();

    let access = exp(ExpKind::Field(
        Box::new(app("mk_cpu", vec![unit()])),
        id("pc"),
    ));
    assert_eq!(typ_of(&infer_exp(&env, &access).unwrap()), bits(8));

    let update = exp(ExpKind::RecordUpdate(
        Box::new(app("mk_cpu", vec![unit()])),
        vec![(id("pc"), bin_lit("00000001"))],
    ));
    assert_eq!(typ_of(&infer_exp(&env, &update).unwrap()), Typ::id("Cpu"));

    // Field expressions are checked against the declared field type.
    let bad_update = exp(ExpKind::RecordUpdate(
        Box::new(app("mk_cpu", vec![unit()])),
        vec![(id("pc"), bool_lit(true))],
    ));
    assert!(infer_exp(&env, &bad_update).is_err());
}

#[test]
fn numeric_constants_name_expressions_in_types() {
    init_logging();
    let defs = vec![
        Def::NumConst(id("xlen"), Nexp::constant(64)),
        spec(
            "mask",
            TypQuant::empty(),
            fn_typ(vec![Typ::unit()], Typ::bits(Nexp::Id(id("xlen")))),
        ),
    ];
    let (_, env) = driver::check_defs(&prelude(), &defs).unwrap();

    // A 64-bit literal checks against bits(xlen).
    let literal = bin_lit(&"0".repeat(64));
    assert!(
        sail_core::check_exp(&env, &literal, &Typ::bits(Nexp::Id(id("xlen")))).is_ok()
    );
    assert!(
        sail_core::check_exp(&env, &bin_lit("0000"), &Typ::bits(Nexp::Id(id("xlen")))).is_err()
    );

    // An unknown numeric constant is rejected at the specification.
    let dangling = spec(
        "bad",
        TypQuant::empty(),
        fn_typ(vec![Typ::unit()], Typ::bits(Nexp::Id(id("ylen")))),
    );
    assert!(matches!(
        driver::check_defs(&env, &[dangling]),
        Err(TypeError::NoNumIdent { .. })
    ));
}

#[test]
fn type_synonyms_expand_during_checking() {
    init_logging();
    let defs = vec![
        Def::Type(TypeDef::Abbrev {
            id: id("byte"),
            quant: TypQuant::empty(),
            arg: TypArg::Typ(bits(8)),
            span: Span::Empty,
        }),
        spec("load", TypQuant::empty(), fn_typ(vec![Typ::id("byte")], Typ::unit())),
    ];
    let (_, env) = driver::check_defs(&prelude(), &defs).unwrap();

    let call = app("load", vec![bin_lit("00000000")]);
    assert!(sail_core::check_exp(&env, &call, &Typ::unit()).is_ok());
    let wrong = app("load", vec![bin_lit("0000")]);
    assert!(sail_core::check_exp(&env, &wrong, &Typ::unit()).is_err());
}

#[test]
fn constraint_synonyms_are_option_gated() {
    init_logging();
    let synonym = Def::Type(TypeDef::Constraint {
        id: id("small"),
        params: vec![KindedId::int(kid("n"))],
        body: NConstraint::lteq(Nexp::var(kid("n")), Nexp::constant(10)),
        span: Span::Empty,
    });

    // Disallowed by default.
    assert!(driver::check_defs(&prelude(), &[synonym.clone()]).is_err());

    let mut opts = Options::default();
    opts.constraint_synonyms = true;
    let env = Env::with_options(opts);
    let f = spec(
        "f",
        TypQuant::new(
            vec![KindedId::int(kid("n"))],
            vec![NConstraint::App(
                id("small"),
                vec![TypArg::Nexp(Nexp::var(kid("n")))],
            )],
        ),
        fn_typ(vec![atom_var("n")], Typ::unit()),
    );
    let (_, env) = driver::check_defs(&env, &[synonym, f]).unwrap();

    assert!(infer_exp(&env, &app("f", vec![num(5)])).is_ok());
    assert!(infer_exp(&env, &app("f", vec![num(11)])).is_err());
}

#[test]
fn assignment_through_register_references() {
    init_logging();
    let reg = Def::Register(RegisterDef {
        id: id("R"),
        typ: bits(8),
        init: None,
        span: Span::Empty,
    });
    let (_, env) = driver::check_defs(&prelude(), &[reg]).unwrap();

    let assign = exp(ExpKind::Assign(
        Box::new(LExp::new(
            LExpKind::Deref(exp(ExpKind::Ref(id("R")))),
            Span::Empty,
        )),
        Box::new(bin_lit("00000000")),
    ));
    let checked = sail_core::check_exp(&env, &assign, &Typ::unit()).unwrap();
    assert!(checked.effect().contains(Effect::WriteReg));
}

#[test]
fn match_arms_check_against_the_target() {
    init_logging();
    let defs = vec![Def::Type(TypeDef::Enum {
        id: id("Permission"),
        members: vec![id("Read"), id("Write")],
        span: Span::Empty,
    })];
    let (_, mut env) = driver::check_defs(&prelude(), &defs).unwrap();
    env.add_local(id("p"), Mut::Immutable, Typ::id("Permission"));

    let matched = exp(ExpKind::Match(
        Box::new(var("p")),
        vec![
            PatExp {
                pat: pat_id("Read"),
                exp: num(1),
            },
            PatExp {
                pat: pat_id("Write"),
                exp: num(2),
            },
        ],
    ));
    let target = Typ::range(Nexp::constant(1), Nexp::constant(2));
    assert!(sail_core::check_exp(&env, &matched, &target).is_ok());

    let too_narrow = Typ::atom(Nexp::constant(1));
    assert!(sail_core::check_exp(&env, &matched, &too_narrow).is_err());
}

#[test]
fn failed_definitions_leave_the_environment_unchanged() {
    init_logging();
    let good = spec("f", TypQuant::empty(), fn_typ(vec![Typ::int()], Typ::int()));
    let bad = spec("g", TypQuant::empty(), fn_typ(vec![Typ::id("NoSuch")], Typ::int()));
    let also_good = spec("h", TypQuant::empty(), fn_typ(vec![Typ::int()], Typ::int()));

    let (checked, env, errors) =
        driver::check_defs_continuing(&prelude(), &[good, bad, also_good]);
    assert_eq!(checked.len(), 2);
    assert_eq!(errors.len(), 1);
    assert!(env.have_val_spec(&id("f")));
    assert!(!env.have_val_spec(&id("g")));
    assert!(env.have_val_spec(&id("h")));
}

#[test]
fn rechecking_annotated_definitions_is_stable() {
    init_logging();
    let defs = vec![
        spec(
            "add_int",
            forall_int(&["n", "m"], Vec::new()),
            fn_typ(
                vec![atom_var("n"), atom_var("m")],
                Typ::atom(Nexp::sum(Nexp::var(kid("n")), Nexp::var(kid("m")))),
            ),
        ),
        Def::Let(pat_id("three"), app("add_int", vec![num(1), num(2)])),
    ];
    let (checked, _) = driver::check_defs(&prelude(), &defs).unwrap();
    let annot = checked[1].annot.as_ref().unwrap().clone();

    let stripped: Vec<Def> = checked.iter().map(|def| driver::strip_def(&def.def)).collect();
    let (rechecked, _) = driver::check_defs(&prelude(), &stripped).unwrap();
    let annot2 = rechecked[1].annot.as_ref().unwrap();

    assert_eq!(annot.typ, annot2.typ);
    assert_eq!(annot.effect, annot2.effect);
}
