use metallib_ir::{
    apply, DowngradeTarget, IrModule, PatchError, RuleFile, RuleSet, AIR_VERSION_RULE,
    SAMPLER_STATE_RULE, TARGET_TRIPLE_RULE,
};

const MAIN0_LL: &str = r#"; ModuleID = 'main0.air'
source_filename = "main0.metal"
target datalayout = "e-p:64:64:64-i1:8:8-i8:8:8-i16:16:16-i32:32:32-i64:64:64-f32:32:32-f64:64:64-v16:16:16-v24:32:32-v32:32:32-v48:64:64-v64:64:64-v96:128:128-v128:128:128-v192:256:256-v256:256:256-v512:512:512-v1024:1024:1024-n8:16:32"
target triple = "air64_v27-apple-macosx15.0.0"

%struct._sampler_t = type opaque

@__air_sampler_state = internal constant [2 x i64] [i64 4294967298, i64 0], section "air.sampler_state"
@__air_sampler_state.1 = internal constant [2 x i64] zeroinitializer

; Function Attrs: convergent mustprogress nounwind willreturn
define void @vertex_main(float addrspace(1)* noalias nocapture readonly "air-buffer-no-alias" %0) local_unnamed_addr #0 {
  ret void
}

attributes #0 = { convergent mustprogress nounwind willreturn "frame-pointer"="none" }

!air.vertex = !{!0}
!air.compile_options = !{!3, !4}
!llvm.ident = !{!5}
!air.version = !{!6}
!air.language_version = !{!7}
!air.source_file_name = !{!8}

!0 = !{void (float addrspace(1)*)* @vertex_main, !1, !2}
!1 = !{}
!2 = !{!"air.buffer", !"air.location_index", i32 0, i32 1}
!3 = !{!"air.compile.denorms_disable"}
!4 = !{!"air.compile.fast_math_enable"}
!5 = !{!"Apple metal version 32023.404 (metalfe-32023.404)"}
!6 = !{i32 2, i32 7, i32 0}
!7 = !{!"Metal", i32 3, i32 2, i32 0}
!8 = !{!"/tmp/main0.metal"}
"#;

fn builtin() -> RuleSet {
    RuleSet::builtin(&DowngradeTarget::default())
}

#[test]
fn builtin_rules_lower_every_version() {
    let module = IrModule::new(MAIN0_LL);
    let outcome = apply(&module, &builtin()).unwrap();
    let text = outcome.module.text();

    assert!(text.contains("!6 = !{i32 2, i32 6, i32 0}\n"));
    assert!(text.contains("!7 = !{!\"Metal\", i32 3, i32 1, i32 0}\n"));
    assert_eq!(
        outcome.module.target_triple(),
        Some("air64_v26-apple-macosx14.0.0")
    );
    assert!(text.contains(
        "@__air_sampler_state = internal constant i64 4294967298, section \"air.sampler_state\"\n"
    ));
    assert!(text.contains("@__air_sampler_state.1 = internal constant i64 zeroinitializer\n"));
    // Unrelated nodes are untouched.
    assert!(text.contains("!2 = !{!\"air.buffer\", !\"air.location_index\", i32 0, i32 1}\n"));
    assert!(outcome.changed());

    let sampler = outcome
        .applied
        .iter()
        .find(|report| report.rule_id == SAMPLER_STATE_RULE)
        .unwrap();
    assert_eq!(sampler.matches, 2);
    assert_eq!(sampler.changed, 2);
}

#[test]
fn builtin_rules_are_idempotent() {
    let rules = builtin();
    let once = apply(&IrModule::new(MAIN0_LL), &rules).unwrap().module;
    let twice = apply(&once, &rules).unwrap();

    assert_eq!(twice.module, once);
    assert!(!twice.changed());
    // The required rule still found its node the second time around.
    let air = &twice.applied[0];
    assert_eq!(air.rule_id, AIR_VERSION_RULE);
    assert_eq!((air.matches, air.changed), (1, 0));
}

#[test]
fn older_modules_are_left_alone() {
    let older = MAIN0_LL
        .replace("i32 2, i32 7, i32 0", "i32 2, i32 4, i32 0")
        .replace("air64_v27-apple-macosx15.0.0", "air64_v24-apple-macosx12.0.0");
    let outcome = apply(&IrModule::new(older.clone()), &builtin()).unwrap();
    assert!(outcome.module.text().contains("!6 = !{i32 2, i32 4, i32 0}"));
    assert_eq!(
        outcome.module.target_triple(),
        Some("air64_v24-apple-macosx12.0.0")
    );
    let triple = outcome
        .applied
        .iter()
        .find(|report| report.rule_id == TARGET_TRIPLE_RULE)
        .unwrap();
    assert_eq!(triple.changed, 0);
}

#[test]
fn missing_air_version_fails_the_module() {
    let stripped: String = MAIN0_LL
        .lines()
        .filter(|line| !line.starts_with("!air.version"))
        .map(|line| format!("{line}\n"))
        .collect();
    match apply(&IrModule::new(stripped), &builtin()) {
        Err(PatchError::RuleUnsatisfied { rule_id }) => assert_eq!(rule_id, AIR_VERSION_RULE),
        other => panic!("expected RuleUnsatisfied, got {other:?}"),
    }
}

#[test]
fn user_literal_rule_patches_each_module() {
    let file = RuleFile::from_json(
        r#"{"rules": [{"id": "air-27", "match": "air.version 27", "action": "replace",
                       "text": "air.version 26", "required": true}]}"#,
    )
    .unwrap();
    let rules = RuleSet::new(file.compile().unwrap());

    for name in ["vertex_main", "frag_main"] {
        let text = format!("; ModuleID = '{name}.air'\n; air.version 27\ndefine void @{name}() {{\n  ret void\n}}\n");
        let outcome = apply(&IrModule::new(text), &rules).unwrap();
        assert!(outcome.module.text().contains("; air.version 26\n"));
        assert!(!outcome.module.text().contains("air.version 27"));
    }
}

#[test]
fn user_rules_run_after_builtins() {
    let file = RuleFile::from_json(
        r#"{"rules": [{"id": "mark", "match": "i32 2, i32 6, i32 0", "action": "insert_after",
                       "text": ", i32 99", "required": true}]}"#,
    )
    .unwrap();
    let rules = builtin().with(file.compile().unwrap());
    let outcome = apply(&IrModule::new(MAIN0_LL), &rules).unwrap();
    // Only matches once the built-in rule has lowered the version.
    assert!(outcome
        .module
        .text()
        .contains("!6 = !{i32 2, i32 6, i32 0, i32 99}"));
}
