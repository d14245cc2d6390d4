//! Inference-mode scenarios: literals, function application with quantifier
//! instantiation, branch joins, effects, and annotation idempotence.

mod support;

use pretty_assertions::assert_eq;

use sail_core::ast::*;
use sail_core::check::infer_exp;
use sail_core::reporting::TypeError;
use sail_core::source::Span;
use sail_core::subtype;
use sail_core::{check_exp, driver};

use support::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn literals_have_fixed_types() {
    init_logging();
    let env = prelude();
    assert_eq!(typ_of(&infer_exp(&env, &num(5)).unwrap()), atom(5));
    assert_eq!(typ_of(&infer_exp(&env, &unit()).unwrap()), Typ::unit());
    assert_eq!(typ_of(&infer_exp(&env, &bool_lit(true)).unwrap()), Typ::bool());
    assert_eq!(
        typ_of(&infer_exp(&env, &exp(ExpKind::Lit(Lit::Zero))).unwrap()),
        Typ::bit()
    );
    assert_eq!(
        typ_of(&infer_exp(&env, &string_lit("sail")).unwrap()),
        Typ::string()
    );
}

#[test]
fn vector_literals_have_bit_lengths() {
    init_logging();
    let env = prelude();
    assert_eq!(typ_of(&infer_exp(&env, &bin_lit("0101")).unwrap()), bits(4));
    assert_eq!(
        typ_of(&infer_exp(&env, &exp(ExpKind::Lit(Lit::Hex("ff".to_owned())))).unwrap()),
        bits(8)
    );
}

#[test]
fn application_instantiates_the_quantifier() {
    init_logging();
    // val f : forall 'n, 'n >= 0. atom('n) -> atom('n + 1)
    let f = spec(
        "f",
        forall_int(&["n"], vec![NConstraint::gteq(Nexp::var(kid("n")), Nexp::constant(0))]),
        fn_typ(
            vec![atom_var("n")],
            Typ::atom(Nexp::sum(Nexp::var(kid("n")), Nexp::constant(1))),
        ),
    );
    let (_, env) = driver::check_defs(&prelude(), &[f]).unwrap();

    let call = infer_exp(&env, &app("f", vec![num(3)])).unwrap();
    assert_eq!(typ_of(&call), atom(4));
    assert!(call.effect().is_pure());
}

#[test]
fn application_rejects_unsatisfied_quantifier_constraints() {
    init_logging();
    let f = spec(
        "f",
        forall_int(&["n"], vec![NConstraint::gteq(Nexp::var(kid("n")), Nexp::constant(0))]),
        fn_typ(vec![atom_var("n")], atom_var("n")),
    );
    let (_, env) = driver::check_defs(&prelude(), &[f]).unwrap();

    match infer_exp(&env, &app("f", vec![num(-2)])) {
        Err(TypeError::CouldNotProve { constraint, .. }) => {
            assert_eq!(
                constraint,
                NConstraint::gteq(Nexp::constant(-2), Nexp::constant(0))
            );
        }
        other => panic!("expected an unproved constraint, got {:?}", other),
    }
}

#[test]
fn checking_against_the_product_type() {
    init_logging();
    // val g : forall 'n 'm. (atom('n), atom('m)) -> atom('n * 'm)
    let g = spec(
        "g",
        forall_int(&["n", "m"], Vec::new()),
        fn_typ(
            vec![atom_var("n"), atom_var("m")],
            Typ::atom(Nexp::times(Nexp::var(kid("n")), Nexp::var(kid("m")))),
        ),
    );
    let (_, env) = driver::check_defs(&prelude(), &[g]).unwrap();

    let call = app("g", vec![num(2), num(3)]);
    assert!(check_exp(&env, &call, &atom(6)).is_ok());

    match check_exp(&env, &call, &atom(7)) {
        Err(TypeError::Subtype { found, expected, .. }) => {
            assert_eq!(found, atom(6));
            assert_eq!(expected, atom(7));
        }
        other => panic!("expected a subtype failure, got {:?}", other),
    }
}

#[test]
fn conditional_branches_pack_into_an_existential() {
    init_logging();
    let env = prelude();
    // let c = true in if c then 1 else 2
    let body = if_exp(var("c"), num(1), num(2));
    let let_exp = exp(ExpKind::Let(
        pat_id("c"),
        Box::new(bool_lit(true)),
        Box::new(body),
    ));
    let inferred = infer_exp(&env, &let_exp).unwrap();

    let packed = Typ::exist(
        vec![KindedId::int(kid("k"))],
        NConstraint::Set(kid("k"), vec![1.into(), 2.into()]),
        atom_var("k"),
    );
    assert!(subtype::typ_equality(&env, &typ_of(&inferred), &packed, Span::Empty).is_ok());
}

#[test]
fn register_reads_carry_their_effect() {
    init_logging();
    let reg = Def::Register(RegisterDef {
        id: id("PC"),
        typ: bits(8),
        init: None,
        span: Span::Empty,
    });
    let (_, env) = driver::check_defs(&prelude(), &[reg]).unwrap();

    let read = infer_exp(&env, &var("PC")).unwrap();
    assert_eq!(typ_of(&read), bits(8));
    assert_eq!(read.effect(), EffectSet::single(Effect::ReadReg));
}

#[test]
fn effects_bubble_to_every_enclosing_node() {
    init_logging();
    let reg = Def::Register(RegisterDef {
        id: id("PC"),
        typ: bits(8),
        init: None,
        span: Span::Empty,
    });
    let (_, env) = driver::check_defs(&prelude(), &[reg]).unwrap();

    // { PC = 0b00000000; PC }
    let assign = exp(ExpKind::Assign(
        Box::new(LExp::new(LExpKind::Id(id("PC")), Span::Empty)),
        Box::new(bin_lit("00000000")),
    ));
    let body = block(vec![assign, var("PC")]);
    let checked = check_exp(&env, &body, &bits(8)).unwrap();

    assert_eq!(
        checked.effect(),
        EffectSet::of(&[Effect::ReadReg, Effect::WriteReg])
    );
    assert!(effects_monotone(&checked));
}

#[test]
fn assertions_and_exits_carry_the_escape_effect() {
    init_logging();
    let env = prelude();
    let asserted = infer_exp(&env, &assert_exp(bool_lit(true))).unwrap();
    assert!(asserted.effect().contains(Effect::Escape));

    let exited = infer_exp(&env, &exp(ExpKind::Exit(Box::new(unit())))).unwrap();
    assert!(exited.effect().contains(Effect::Escape));
}

#[test]
fn undefined_needs_a_checking_type() {
    init_logging();
    let env = prelude();
    let undefined = exp(ExpKind::Lit(Lit::Undefined));

    assert!(infer_exp(&env, &undefined).is_err());
    let checked = check_exp(&env, &undefined, &bits(4)).unwrap();
    assert_eq!(checked.effect(), EffectSet::single(Effect::Undefined));
}

#[test]
fn annotations_are_idempotent() {
    init_logging();
    let f = spec(
        "f",
        forall_int(&["n"], vec![NConstraint::gteq(Nexp::var(kid("n")), Nexp::constant(0))]),
        fn_typ(
            vec![atom_var("n")],
            Typ::atom(Nexp::sum(Nexp::var(kid("n")), Nexp::constant(1))),
        ),
    );
    let (_, env) = driver::check_defs(&prelude(), &[f]).unwrap();

    let first = infer_exp(&env, &app("f", vec![num(3)])).unwrap();
    let second = infer_exp(&env, &first.strip_annots()).unwrap();
    assert_eq!(typ_of(&first), typ_of(&second));
    assert_eq!(first.effect(), second.effect());
}
