mod foundation_urlsession;
