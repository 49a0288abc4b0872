pub mod books;

use std::sync::Arc;

use stockbook_kernel::ModuleRegistry;

/// Register all application modules with the registry.
///
/// Returns the books module so callers outside HTTP (the CLI) can reach its
/// service once the registry has initialized it.
pub fn register_all(registry: &mut ModuleRegistry) -> Arc<books::BooksModule> {
    let books = books::create_module();
    registry.register_custom(books.clone());
    books
}
