use std::collections::HashSet;

use actix_web::http::Method;
use actix_web::middleware::from_fn;
use actix_web::{web, Route};

use crate::middleware::{protect, restrict_to_admin};

/// Middleware vocabulary a route can declare. Declaration order in the
/// table does not matter: execution order is fixed, `Protect` always runs
/// before `RestrictToAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mw {
    Protect,
    RestrictToAdmin,
}

/// One row of a resource's route table: HTTP method, path suffix,
/// middleware set, and a constructor for the actix route. `"/"` stands for
/// the resource root, so it registers at the bare prefix.
pub struct RouteDef {
    pub method: Method,
    pub path: &'static str,
    pub middleware: &'static [Mw],
    pub service: fn(Method) -> Route,
}

/// The order the declared middlewares actually run in.
pub fn execution_order(middleware: &[Mw]) -> Vec<Mw> {
    let mut chain = Vec::new();
    if middleware.contains(&Mw::Protect) {
        chain.push(Mw::Protect);
    }
    if middleware.contains(&Mw::RestrictToAdmin) {
        chain.push(Mw::RestrictToAdmin);
    }
    chain
}

/// Registers a resource's table under `prefix`. Runs once at startup and
/// panics on malformed declarations, since those are programmer errors and
/// the process must not come up half-routed.
pub fn register(prefix: &str, defs: Vec<RouteDef>, cfg: &mut web::ServiceConfig) {
    validate(prefix, &defs);

    // Group by path so GET and PATCH on the same suffix share one actix
    // resource; separate resources would shadow each other.
    let mut by_path: Vec<(&'static str, Vec<RouteDef>)> = Vec::new();
    for def in defs {
        match by_path.iter_mut().find(|(path, _)| *path == def.path) {
            Some((_, group)) => group.push(def),
            None => by_path.push((def.path, vec![def])),
        }
    }

    for (path, group) in by_path {
        let full = if path == "/" {
            prefix.to_string()
        } else {
            format!("{}{}", prefix, path)
        };
        let mut resource = web::resource(full);
        for def in group {
            let route = apply_middleware((def.service)(def.method.clone()), def.middleware);
            resource = resource.route(route);
        }
        cfg.service(resource);
    }
}

fn validate(prefix: &str, defs: &[RouteDef]) {
    assert!(
        prefix.starts_with('/'),
        "route prefix `{}` must start with `/`",
        prefix
    );
    let mut seen = HashSet::new();
    for def in defs {
        assert!(
            !def.path.is_empty(),
            "route under `{}` declares an empty path",
            prefix
        );
        assert!(
            def.path.starts_with('/'),
            "route path `{}` under `{}` must start with `/`",
            def.path,
            prefix
        );
        assert!(
            seen.insert((def.method.clone(), def.path)),
            "duplicate route {} {}{}",
            def.method,
            prefix,
            def.path
        );
        if def.middleware.contains(&Mw::RestrictToAdmin) {
            assert!(
                def.middleware.contains(&Mw::Protect),
                "route {} {}{} restricts to admin without protect",
                def.method,
                prefix,
                def.path
            );
        }
    }
}

fn apply_middleware(mut route: Route, middleware: &[Mw]) -> Route {
    // The last wrap is the outermost layer and runs first, so wrap in
    // reverse execution order.
    for mw in execution_order(middleware).into_iter().rev() {
        route = match mw {
            Mw::Protect => route.wrap(from_fn(protect)),
            Mw::RestrictToAdmin => route.wrap(from_fn(restrict_to_admin)),
        };
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::HttpResponse;

    fn def(method: Method, path: &'static str, middleware: &'static [Mw]) -> RouteDef {
        RouteDef {
            method,
            path,
            middleware,
            service: |m| web::method(m).to(|| async { HttpResponse::Ok().finish() }),
        }
    }

    #[test]
    fn well_formed_tables_pass_validation() {
        validate(
            "/api/v1/widgets",
            &[
                def(Method::GET, "/", &[]),
                def(Method::POST, "/", &[Mw::Protect]),
                def(Method::GET, "/{id}", &[]),
                def(Method::DELETE, "/{id}", &[Mw::Protect, Mw::RestrictToAdmin]),
            ],
        );
    }

    #[test]
    #[should_panic(expected = "duplicate route")]
    fn duplicate_method_path_pairs_fail_fast() {
        validate(
            "/api/v1/widgets",
            &[def(Method::GET, "/", &[]), def(Method::GET, "/", &[])],
        );
    }

    #[test]
    #[should_panic(expected = "empty path")]
    fn empty_paths_fail_fast() {
        validate("/api/v1/widgets", &[def(Method::GET, "", &[])]);
    }

    #[test]
    #[should_panic(expected = "must start with `/`")]
    fn relative_paths_fail_fast() {
        validate("/api/v1/widgets", &[def(Method::GET, "no-slash", &[])]);
    }

    #[test]
    #[should_panic(expected = "restricts to admin without protect")]
    fn admin_without_protect_fails_fast() {
        validate(
            "/api/v1/widgets",
            &[def(Method::GET, "/", &[Mw::RestrictToAdmin])],
        );
    }

    #[test]
    fn protect_always_runs_before_restrict_to_admin() {
        assert_eq!(
            execution_order(&[Mw::RestrictToAdmin, Mw::Protect]),
            vec![Mw::Protect, Mw::RestrictToAdmin]
        );
        assert_eq!(
            execution_order(&[Mw::Protect, Mw::RestrictToAdmin]),
            vec![Mw::Protect, Mw::RestrictToAdmin]
        );
        assert_eq!(execution_order(&[Mw::Protect]), vec![Mw::Protect]);
        assert!(execution_order(&[]).is_empty());
    }

    #[test]
    fn same_method_on_different_paths_is_allowed() {
        validate(
            "/api/v1/widgets",
            &[
                def(Method::PATCH, "/{id}", &[Mw::Protect]),
                def(Method::PATCH, "/{id}/sold", &[Mw::Protect]),
            ],
        );
    }
}
