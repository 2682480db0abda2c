// EmberCL Symbol Table and Package System
//
// ANSI CL symbol/package semantics with O(1) symbol comparison. Value,
// function and plist slots live in the per-process dictionary, not here;
// the table owns only names, home packages and the globally-special flag.

use std::collections::HashMap;

/// Unique identifier for a symbol (index into symbol table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Unique identifier for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageId(pub u32);

pub const KEYWORD_PACKAGE: PackageId = PackageId(0);
pub const CL_PACKAGE: PackageId = PackageId(1);
pub const USER_PACKAGE: PackageId = PackageId(2);

#[derive(Debug, Clone)]
pub struct Symbol {
    /// The symbol's name (e.g. "CAR", "MY-VAR")
    pub name: String,
    /// The home package (None for uninterned symbols)
    pub package: Option<PackageId>,
    /// Globally proclaimed special (DEFVAR/DEFPARAMETER)
    pub is_special: bool,
}

impl Symbol {
    pub fn new(name: String, package: Option<PackageId>) -> Self {
        Self {
            name,
            package,
            is_special: false,
        }
    }

    pub fn is_keyword(&self) -> bool {
        self.package == Some(KEYWORD_PACKAGE)
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub nicknames: Vec<String>,
    /// Internal (non-exported) symbols
    internal: HashMap<String, SymbolId>,
    /// External (exported) symbols
    external: HashMap<String, SymbolId>,
    /// Packages whose external symbols are inherited
    use_list: Vec<PackageId>,
}

impl Package {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_uppercase(),
            nicknames: Vec::new(),
            internal: HashMap::new(),
            external: HashMap::new(),
            use_list: Vec::new(),
        }
    }

    pub fn use_package(&mut self, pkg: PackageId) {
        if !self.use_list.contains(&pkg) {
            self.use_list.push(pkg);
        }
    }

    pub fn export(&mut self, name: &str, sym: SymbolId) {
        let upper = name.to_uppercase();
        self.internal.remove(&upper);
        self.external.insert(upper, sym);
    }

    pub fn find_external(&self, name: &str) -> Option<SymbolId> {
        self.external.get(&name.to_uppercase()).copied()
    }

    /// Find a directly present symbol (internal or external)
    pub fn find_present(&self, name: &str) -> Option<SymbolId> {
        let upper = name.to_uppercase();
        self.external
            .get(&upper)
            .or_else(|| self.internal.get(&upper))
            .copied()
    }

    fn remove(&mut self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.internal.remove(&upper).is_some() | self.external.remove(&upper).is_some()
    }
}

/// How FIND-SYMBOL located a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolStatus {
    Internal,
    External,
    Inherited,
}

/// The global symbol table shared by every evaluation context.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    packages: Vec<Package>,
    package_names: HashMap<String, PackageId>,
    current_package: PackageId,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self {
            symbols: Vec::new(),
            packages: Vec::new(),
            package_names: HashMap::new(),
            current_package: USER_PACKAGE,
        };

        table.make_package("KEYWORD"); // PackageId(0)
        table.make_package("COMMON-LISP"); // PackageId(1)
        table.make_package("COMMON-LISP-USER"); // PackageId(2)

        table.packages[USER_PACKAGE.0 as usize].use_package(CL_PACKAGE);
        table
    }

    pub fn make_package(&mut self, name: &str) -> PackageId {
        let id = PackageId(self.packages.len() as u32);
        let mut pkg = Package::new(name);

        match pkg.name.as_str() {
            "COMMON-LISP" => pkg.nicknames.push("CL".to_string()),
            "COMMON-LISP-USER" => pkg.nicknames.push("CL-USER".to_string()),
            _ => {}
        }

        self.package_names.insert(pkg.name.clone(), id);
        for nick in &pkg.nicknames {
            self.package_names.insert(nick.clone(), id);
        }

        self.packages.push(pkg);
        id
    }

    pub fn find_package(&self, name: &str) -> Option<PackageId> {
        self.package_names.get(&name.to_uppercase()).copied()
    }

    pub fn current_package(&self) -> PackageId {
        self.current_package
    }

    pub fn set_current_package(&mut self, pkg: PackageId) {
        self.current_package = pkg;
    }

    pub fn package(&self, id: PackageId) -> Option<&Package> {
        self.packages.get(id.0 as usize)
    }

    pub fn package_name(&self, id: PackageId) -> Option<&str> {
        self.package(id).map(|p| p.name.as_str())
    }

    pub fn use_package(&mut self, used: PackageId, user: PackageId) -> bool {
        if used.0 as usize >= self.packages.len() {
            return false;
        }
        match self.packages.get_mut(user.0 as usize) {
            Some(pkg) => {
                pkg.use_package(used);
                true
            }
            None => false,
        }
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize)
    }

    pub fn symbol_name(&self, id: SymbolId) -> Option<&str> {
        self.symbol(id).map(|s| s.name.as_str())
    }

    pub fn symbol_package(&self, id: SymbolId) -> Option<PackageId> {
        self.symbol(id).and_then(|s| s.package)
    }

    pub fn is_keyword(&self, id: SymbolId) -> bool {
        self.symbol(id).map(|s| s.is_keyword()).unwrap_or(false)
    }

    /// Globally special (DEFVAR-proclaimed) check.
    pub fn is_special(&self, id: SymbolId) -> bool {
        self.symbol(id).map(|s| s.is_special).unwrap_or(false)
    }

    pub fn proclaim_special(&mut self, id: SymbolId) {
        if let Some(sym) = self.symbols.get_mut(id.0 as usize) {
            sym.is_special = true;
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Intern in the current package.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        self.intern_in(name, self.current_package)
    }

    /// Intern in a specific package, honoring use-list inheritance.
    pub fn intern_in(&mut self, name: &str, pkg_id: PackageId) -> SymbolId {
        if let Some((sym, _)) = self.find_symbol(name, pkg_id) {
            return sym;
        }

        let upper = name.to_uppercase();
        let sym_id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol::new(upper.clone(), Some(pkg_id)));

        if let Some(pkg) = self.packages.get_mut(pkg_id.0 as usize) {
            // Keywords are external by construction
            if pkg_id == KEYWORD_PACKAGE {
                pkg.external.insert(upper, sym_id);
            } else {
                pkg.internal.insert(upper, sym_id);
            }
        }

        sym_id
    }

    pub fn intern_keyword(&mut self, name: &str) -> SymbolId {
        self.intern_in(name, KEYWORD_PACKAGE)
    }

    /// FIND-SYMBOL: present symbols first, then use-list inheritance.
    pub fn find_symbol(&self, name: &str, pkg_id: PackageId) -> Option<(SymbolId, SymbolStatus)> {
        let upper = name.to_uppercase();
        let pkg = self.packages.get(pkg_id.0 as usize)?;

        if let Some(&sym) = pkg.external.get(&upper) {
            return Some((sym, SymbolStatus::External));
        }
        if let Some(&sym) = pkg.internal.get(&upper) {
            return Some((sym, SymbolStatus::Internal));
        }
        for &used in &pkg.use_list {
            if let Some(used_pkg) = self.packages.get(used.0 as usize) {
                if let Some(sym) = used_pkg.find_external(&upper) {
                    return Some((sym, SymbolStatus::Inherited));
                }
            }
        }
        None
    }

    /// Create an uninterned symbol (GENSYM/MAKE-SYMBOL). The name is taken
    /// as given: uninterned symbols keep their case.
    pub fn make_symbol(&mut self, name: &str) -> SymbolId {
        let sym_id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol::new(name.to_string(), None));
        sym_id
    }

    pub fn export_symbol(&mut self, id: SymbolId) {
        if let Some(sym) = self.symbol(id) {
            if let Some(pkg_id) = sym.package {
                let name = sym.name.clone();
                if let Some(pkg) = self.packages.get_mut(pkg_id.0 as usize) {
                    pkg.export(&name, id);
                }
            }
        }
    }

    /// UNINTERN: remove the symbol from the package; if the package was its
    /// home package the symbol becomes uninterned. Returns whether the
    /// symbol was present.
    pub fn unintern(&mut self, id: SymbolId, pkg_id: PackageId) -> bool {
        let name = match self.symbol(id) {
            Some(s) => s.name.clone(),
            None => return false,
        };
        let removed = match self.packages.get_mut(pkg_id.0 as usize) {
            Some(pkg) => match pkg.find_present(&name) {
                Some(present) if present == id => pkg.remove(&name),
                _ => false,
            },
            None => return false,
        };
        if removed {
            if let Some(sym) = self.symbols.get_mut(id.0 as usize) {
                if sym.package == Some(pkg_id) {
                    sym.package = None;
                }
            }
        }
        removed
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
