//! The creation pass: slab loading, attachment resolution, and shallow
//! declaration of every top-level form.
//!
//! Loading is recursive over attachments. A slab is read, preprocessed
//! and parsed exactly once; repeated references resolve through the
//! bundle's id cache, so attachments form a DAG. Declarations recorded
//! here carry only their name and defining tree node; bodies and member
//! types wait for the elaborator.

use std::path::{Path, PathBuf};

use crate::diag::{CreateError, Diagnostic, Diagnostics, Kind};
use crate::model::{
    AliasType, Bundle, CollectionType, Context, Dump, ExternalFunction, Function, FunctionState, LocalFunction, Slab,
    SlabDomain, SlabId, Type, TypeId,
};
use crate::tree::names;
use crate::{pre, reader};

/// Loads the root slab and everything reachable from it, producing a
/// bundle ready for elaboration. Any diagnostic recorded during loading
/// fails the pass.
pub fn create_bundle(root_file: &str, cwd: &Path, lib_paths: &[PathBuf]) -> Result<Bundle, CreateError> {
    let mut loader = Loader {
        bundle: Bundle::new(),
        cwd: cwd.to_path_buf(),
        lib_paths: lib_paths.to_vec(),
        diags: Diagnostics::new(),
    };
    let root_rel = root_file.strip_suffix(".tabi").unwrap_or(root_file);
    let root = loader.get_or_create_slab(SlabDomain::Local, root_rel, None);
    if let Ok(root) = root {
        loader.bundle.root = root;
    }
    if loader.diags.is_empty() {
        Ok(loader.bundle)
    } else {
        Err(CreateError {
            diagnostics: loader.diags.into_vec(),
        })
    }
}

struct Loader {
    bundle: Bundle,
    cwd: PathBuf,
    lib_paths: Vec<PathBuf>,
    diags: Diagnostics,
}

impl Loader {
    /// Resolves a reference to its canonical slab id and loads the slab
    /// unless the bundle already holds it.
    fn get_or_create_slab(&mut self, domain: SlabDomain, rel_id: &str, host: Option<SlabId>) -> Result<SlabId, ()> {
        let slab_id = match domain {
            SlabDomain::Local => {
                // Local attachments resolve relative to the host slab's
                // directory, carried in the id's path prefix.
                let prefix = match host {
                    Some(host) => {
                        let host_id = &self.bundle.slab(host).id;
                        let cut = host_id
                            .rfind('/')
                            .map_or_else(|| host_id.rfind('_').map_or(0, |k| k + 1), |k| k + 1);
                        host_id[..cut].to_string()
                    }
                    None => "LOCAL_".to_string(),
                };
                format!("{prefix}{rel_id}")
            }
            SlabDomain::External => format!("EXTERNAL_{rel_id}"),
        };
        if let Some(existing) = self.bundle.slab_index.get(&slab_id) {
            return Ok(*existing);
        }
        self.create_slab(slab_id, domain, rel_id)
    }

    fn create_slab(&mut self, slab_id: String, domain: SlabDomain, rel_id: &str) -> Result<SlabId, ()> {
        let path = match domain {
            SlabDomain::Local => {
                let rel_path = &slab_id[slab_id.find('_').map_or(0, |k| k + 1)..];
                self.cwd.join(format!("{rel_path}.tabi"))
            }
            SlabDomain::External => {
                let file = format!("{rel_id}.tabi");
                // Search each library directory in order; fall back to
                // the last candidate so the read error names a real path.
                let mut found = self.lib_paths.first().map_or_else(|| PathBuf::from(&file), |d| d.join(&file));
                for dir in &self.lib_paths {
                    let candidate = dir.join(&file);
                    if candidate.is_file() {
                        found = candidate;
                        break;
                    }
                }
                found
            }
        };

        let id = self.bundle.add_slab(Slab::new(slab_id, path.clone()));

        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                self.diags.push(Diagnostic::new(
                    Kind::CannotRead,
                    0,
                    0,
                    format!("slab source file {}: {e}", path.display()),
                ));
                return Err(());
            }
        };
        let source = match pre::preprocess(&source) {
            Ok(source) => source,
            Err(d) => {
                self.diags.push(d);
                return Err(());
            }
        };
        let tree = match reader::parse(&source) {
            Ok(tree) => tree,
            Err(d) => {
                self.diags.push(d);
                return Err(());
            }
        };
        self.bundle.slab_mut(id).source = source;

        for form in tree.children.clone() {
            match form.name {
                names::ATTACH => self.create_attachment(id, &form),
                names::COLLECTION_DECL => {
                    let name = form.child_token(names::NAME).unwrap_or_default().to_string();
                    let type_id = self.bundle.types.alloc(Type::Collection(CollectionType {
                        name: name.clone(),
                        host: id,
                        node: form.clone(),
                        members: indexmap::IndexMap::new(),
                        elaborated: false,
                    }));
                    self.declare_type(id, &form, name, type_id);
                }
                names::ALIAS_DECL => {
                    let name = form.child_token(names::NAME).unwrap_or_default().to_string();
                    let type_id = self.bundle.types.alloc(Type::Alias(AliasType {
                        name: name.clone(),
                        host: id,
                        node: form.clone(),
                        target: None,
                        resolving: false,
                    }));
                    self.declare_type(id, &form, name, type_id);
                }
                names::CONTEXT_DECL => {
                    let name = form.child_token(names::NAME).unwrap_or_default().to_string();
                    if self.check_unique(id, &form, &name) {
                        let ctx = self.bundle.add_context(Context {
                            name: name.clone(),
                            host: id,
                            node: form.clone(),
                            members: indexmap::IndexMap::new(),
                        });
                        self.bundle.slab_mut(id).contexts.insert(name, ctx);
                    }
                }
                names::DUMP_DECL => {
                    let name = form.child_token(names::NAME).unwrap_or_default().to_string();
                    if self.check_unique(id, &form, &name) {
                        let dump = self.bundle.add_dump(Dump {
                            name: name.clone(),
                            host: id,
                            node: form.clone(),
                            members: indexmap::IndexMap::new(),
                        });
                        self.bundle.slab_mut(id).dumps.insert(name, dump);
                    }
                }
                names::FUNCTION_DECL => {
                    let name = form.child_token(names::NAME).unwrap_or_default().to_string();
                    if self.check_unique(id, &form, &name) {
                        let func = self.bundle.add_function(Function::Local(LocalFunction {
                            name: name.clone(),
                            host: id,
                            node: form.clone(),
                            state: FunctionState::Created,
                            return_type: TypeId::NONE,
                            captures: Vec::new(),
                            args: Vec::new(),
                            body: None,
                        }));
                        self.bundle.slab_mut(id).functions.insert(name, func);
                    }
                }
                names::EXTERNAL_FUNCTION_DECL => {
                    let name = form.child_token(names::NAME).unwrap_or_default().to_string();
                    if self.check_unique(id, &form, &name) {
                        let external_name = form
                            .child_token(names::EXTERNAL_NAME)
                            .unwrap_or(name.as_str())
                            .to_string();
                        let func = self.bundle.add_function(Function::External(ExternalFunction {
                            name: name.clone(),
                            host: id,
                            node: form.clone(),
                            state: FunctionState::Created,
                            return_type: TypeId::NONE,
                            args: Vec::new(),
                            external_name,
                        }));
                        self.bundle.slab_mut(id).functions.insert(name, func);
                    }
                }
                _ => {}
            }
        }
        self.bundle.slab_mut(id).tree = Some(tree);
        Ok(id)
    }

    fn create_attachment(&mut self, host: SlabId, form: &crate::tree::Node) {
        let rel_id = form.child_token(names::REL_ID).unwrap_or_default().to_string();
        let domain = if form.child(names::EXTERNAL).is_some() {
            SlabDomain::External
        } else {
            SlabDomain::Local
        };
        // The alias defaults to the relative id, verbatim.
        let alias = form
            .child_token(names::ALIAS)
            .map(ToString::to_string)
            .unwrap_or_else(|| rel_id.clone());
        let Ok(attached) = self.get_or_create_slab(domain, &rel_id, Some(host)) else {
            return;
        };
        let slab = self.bundle.slab_mut(host);
        if slab.attachments.contains_key(&alias) {
            self.diags.push(Diagnostic::new(
                Kind::DoubleAlias,
                form.line,
                form.col,
                format!("more than one slab goes by alias `{alias}`"),
            ));
            return;
        }
        slab.attachments.insert(alias, attached);
    }

    fn declare_type(&mut self, slab: SlabId, form: &crate::tree::Node, name: String, type_id: TypeId) {
        if self.check_unique(slab, form, &name) {
            self.bundle.slab_mut(slab).types.insert(name, type_id);
        }
    }

    /// Declared names share one namespace per slab; duplicates are
    /// reported as `double-alias`.
    fn check_unique(&mut self, slab: SlabId, form: &crate::tree::Node, name: &str) -> bool {
        if self.bundle.slab(slab).declares(name) {
            self.diags.push(Diagnostic::new(
                Kind::DoubleAlias,
                form.line,
                form.col,
                format!("name `{name}` is declared more than once in slab {}", self.bundle.slab(slab).id),
            ));
            false
        } else {
            true
        }
    }
}
