use ledgerbridge_isolation::{
    ActivationBackend, ActivationCookie, ContextHandle, InstantiationChain,
    InstantiationRequest, InstantiationStrategy, IsolationActivator, IsolationResult,
    StrategyFailure,
};
use ledgerbridge_types::{ClassId, EngineIdentity, EngineVersion};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

struct Scripted {
    name: &'static str,
    result: Result<u32, StrategyFailure>,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl InstantiationStrategy for Scripted {
    type Handle = u32;

    fn name(&self) -> &'static str {
        self.name
    }

    fn instantiate(&self, _request: &InstantiationRequest) -> Result<u32, StrategyFailure> {
        self.log.borrow_mut().push(self.name);
        self.result.clone()
    }
}

fn request() -> InstantiationRequest {
    InstantiationRequest {
        class_id: Some(ClassId::from_u128(5)),
        prog_id: "SDOEngine.32".to_string(),
        binary: None,
        context_active: true,
    }
}

fn scripted(
    log: &Rc<RefCell<Vec<&'static str>>>,
    name: &'static str,
    result: Result<u32, StrategyFailure>,
) -> Scripted {
    Scripted {
        name,
        result,
        log: log.clone(),
    }
}

#[test]
fn chain_stops_at_first_success_after_failures() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let chain = InstantiationChain::new()
        .with(scripted(
            &log,
            "a",
            Err(StrategyFailure::os(0x8004_0154_u32 as i32, "Class not registered")),
        ))
        .with(scripted(&log, "b", Err(StrategyFailure::new("no active isolation context"))))
        .with(scripted(&log, "c", Ok(99)))
        .with(scripted(&log, "d", Ok(100)));

    let outcome = chain.run(&request());

    assert_eq!(outcome.handle, Some(99));
    assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(
        outcome.attempts[0].failure.as_ref().and_then(|f| f.code),
        Some(0x8004_0154_u32 as i32)
    );
    assert!(outcome.attempts[2].failure.is_none());
}

#[test]
fn exhausted_chain_yields_no_handle_and_full_log() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let chain = InstantiationChain::new()
        .with(scripted(&log, "a", Err(StrategyFailure::new("first"))))
        .with(scripted(&log, "b", Err(StrategyFailure::os(5, "second"))));

    let outcome = chain.run(&request());

    assert_eq!(outcome.handle, None);
    assert_eq!(chain.names(), vec!["a", "b"]);
    assert_eq!(outcome.summary(), "a: first; b: second (0x00000005)");
}

#[test]
fn empty_chain_yields_nothing() {
    let chain: InstantiationChain<u32> = InstantiationChain::new();
    assert!(chain.is_empty());
    let outcome = chain.run(&request());
    assert!(outcome.handle.is_none());
    assert!(outcome.attempts.is_empty());
}

struct InertBackend;

impl ActivationBackend for InertBackend {
    fn set_search_path(&mut self, _dir: Option<&Path>) -> IsolationResult<()> {
        Ok(())
    }
    fn create_context(&mut self, _manifest: &Path) -> IsolationResult<ContextHandle> {
        Ok(ContextHandle(1))
    }
    fn activate(&mut self, _context: ContextHandle) -> IsolationResult<ActivationCookie> {
        Ok(ActivationCookie(1))
    }
    fn deactivate(&mut self, _cookie: ActivationCookie) -> IsolationResult<()> {
        Ok(())
    }
    fn release(&mut self, _context: ContextHandle) {}
}

struct Echo;

impl InstantiationStrategy for Echo {
    type Handle = InstantiationRequest;

    fn name(&self) -> &'static str {
        "echo"
    }

    fn instantiate(
        &self,
        request: &InstantiationRequest,
    ) -> Result<InstantiationRequest, StrategyFailure> {
        Ok(request.clone())
    }
}

#[test]
fn activator_builds_request_from_identity_and_context() {
    let activator = IsolationActivator::with_backend(Box::new(InertBackend));
    let identity = EngineIdentity::for_version(&EngineVersion::new(30, 0))
        .with_class_id(ClassId::from_u128(77));
    let chain = InstantiationChain::new().with(Echo);

    let request = activator.instantiate(&chain, &identity, None).handle.unwrap();
    assert_eq!(request.prog_id, "SDOEngine.30");
    assert_eq!(request.class_id, Some(ClassId::from_u128(77)));
    assert!(!request.context_active);
    assert!(request.binary.is_none());

    let overridden = activator
        .instantiate(&chain, &identity, Some(ClassId::from_u128(78)))
        .handle
        .unwrap();
    assert_eq!(overridden.class_id, Some(ClassId::from_u128(78)));
}
